//! OpenAPI documentation for the JSON API, served at `/api/openapi.json`.

use utoipa::OpenApi;

use crate::api;
use crate::catalog::Category;
use crate::tryon::TryOnErrorKind;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Virtual Try-On API",
        description = "Product catalog and AI garment try-on for the storefront."
    ),
    paths(
        api::handlers::products::list_products,
        api::handlers::products::get_product,
        api::handlers::try_on::try_on,
    ),
    components(
        schemas(
            api::models::products::ProductResponse,
            api::models::try_on::TryOnResponse,
            api::models::try_on::TryOnUpload,
            Category,
            TryOnErrorKind,
        )
    ),
    tags(
        (name = "products", description = "Product catalog"),
        (name = "try-on", description = "Virtual try-on"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_endpoints() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/products"));
        assert!(doc.paths.paths.contains_key("/api/products/{product_id}"));
        assert!(doc.paths.paths.contains_key("/api/try-on"));

        let schemas = &doc.components.as_ref().unwrap().schemas;
        assert!(schemas.contains_key("TryOnResponse"));
        assert!(schemas.contains_key("TryOnErrorKind"));
    }
}
