use aihub_core::catalog::{CatalogStore, StoreKind};
use axum::Router;
use tower_http::services::ServeDir;

use crate::state::AppState;

/// Mount the raw store directories (mainly preview images) read-only.
///
/// `GET /workflows/<file>`, `GET /models/<file>`, `GET /loras/<file>`.
pub fn router(store: &CatalogStore) -> Router<AppState> {
    [StoreKind::Workflows, StoreKind::Models, StoreKind::Loras]
        .into_iter()
        .fold(Router::new(), |router, kind| {
            router.nest_service(
                &format!("/{}", kind.dir_name()),
                ServeDir::new(store.dir(kind)),
            )
        })
}
