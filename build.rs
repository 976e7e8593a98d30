fn main() {
    // Writes built.rs (package metadata + git commit) into OUT_DIR.
    built::write_built_file().expect("Failed to acquire build-time information");
}
