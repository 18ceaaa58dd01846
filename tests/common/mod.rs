use axum::Router;

pub async fn create_test_app() -> Router {
    std::env::set_var("DATABASE_URL", "");
    std::env::set_var("MARKETING_WEBHOOK_URLS", "");

    piano_backend_rust::create_app().await
}
