//! OpenAPI entries for the generic views.
//!
//! The CRUD handlers are shared by every view, so their paths are documented
//! from [`views`] at build time instead of per-handler `#[utoipa::path]`s.

use super::{views, ResourceView};
use utoipa::openapi::{
    path::{OperationBuilder, ParameterBuilder, ParameterIn},
    request_body::RequestBodyBuilder,
    Content, HttpMethod, KnownFormat, ObjectBuilder, Paths, Ref, Required, Response,
    ResponseBuilder, SchemaFormat, SecurityRequirement, Type,
};

/// Add every registered view's operations to `paths`.
pub fn document(paths: &mut Paths) {
    for view in views() {
        view.document(paths);
    }
}

fn reply(description: &str) -> Response {
    ResponseBuilder::new()
        .description(description)
        .content(
            "application/json",
            Content::new(Some(Ref::from_schema_name("Reply"))),
        )
        .build()
}

fn query_parameter(name: &str, description: &str) -> ParameterBuilder {
    ParameterBuilder::new()
        .name(name)
        .parameter_in(ParameterIn::Query)
        .required(Required::False)
        .description(Some(description))
        .schema(Some(ObjectBuilder::new().schema_type(Type::Integer)))
}

impl ResourceView {
    /// `manage` or `member`, from the first path segment.
    fn tag(&self) -> &'static str {
        self.path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or("resources")
    }

    fn operation(&self, verb: &str, summary: String) -> OperationBuilder {
        let id = format!(
            "{verb}_{}",
            self.path.trim_start_matches('/').replace('/', "_")
        );
        let mut operation = OperationBuilder::new()
            .tag(self.tag())
            .operation_id(Some(id))
            .summary(Some(summary))
            .response("405", reply("Method not exposed by this view"));
        if !self.gate.is_unrestricted() {
            operation = operation
                .security(SecurityRequirement::new("bearer", Vec::<String>::new()))
                .response("401", reply("Unknown, revoked or expired token"))
                .response("403", reply("Caller's role is not admitted"));
        }
        operation
    }

    fn with_id(operation: OperationBuilder) -> OperationBuilder {
        operation
            .parameter(
                ParameterBuilder::new()
                    .name("id")
                    .parameter_in(ParameterIn::Path)
                    .required(Required::True)
                    .schema(Some(
                        ObjectBuilder::new()
                            .schema_type(Type::String)
                            .format(Some(SchemaFormat::KnownFormat(KnownFormat::Uuid))),
                    )),
            )
            .response("404", reply("No such record"))
    }

    fn with_body(&self, operation: OperationBuilder) -> OperationBuilder {
        let schema = self.collection.payload_schema().map_or_else(
            || Content::new(Some(ObjectBuilder::new().schema_type(Type::Object))),
            |name| Content::new(Some(Ref::from_schema_name(name))),
        );
        operation
            .request_body(Some(
                RequestBodyBuilder::new()
                    .required(Some(Required::True))
                    .content("application/json", schema)
                    .build(),
            ))
            .response("400", reply("Malformed or invalid payload"))
    }

    fn document(&self, paths: &mut Paths) {
        let ops = self.operations;
        let item_path = format!("{}/{{id}}", self.path);

        if ops.list {
            let operation = self
                .operation("list", format!("List {}", self.path))
                .parameter(query_parameter("page", "1-based page number"))
                .parameter(query_parameter("page_size", "Rows per page (capped)"))
                .response("200", reply("Filtered page; other query keys filter"));
            paths.add_path_operation(self.path, vec![HttpMethod::Get], operation.build());
        }
        if ops.create {
            let operation = self
                .with_body(self.operation("create", format!("Create in {}", self.path)))
                .response("201", reply("Created"));
            paths.add_path_operation(self.path, vec![HttpMethod::Post], operation.build());
        }
        if ops.retrieve {
            let operation =
                Self::with_id(self.operation("retrieve", format!("Fetch one of {}", self.path)))
                    .response("200", reply("The record"));
            paths.add_path_operation(&item_path, vec![HttpMethod::Get], operation.build());
        }
        if ops.update {
            let operation = self
                .with_body(Self::with_id(
                    self.operation("update", format!("Merge into one of {}", self.path)),
                ))
                .response("200", reply("The updated record"));
            paths.add_path_operation(
                &item_path,
                vec![HttpMethod::Put, HttpMethod::Patch],
                operation.build(),
            );
        }
        if ops.delete {
            let operation =
                Self::with_id(self.operation("delete", format!("Delete one of {}", self.path)))
                    .response("200", reply("Deleted"));
            paths.add_path_operation(&item_path, vec![HttpMethod::Delete], operation.build());
        }
    }
}
