pub mod auth;
pub mod captcha;
pub mod health;
pub mod resources;

pub use self::health::health;
