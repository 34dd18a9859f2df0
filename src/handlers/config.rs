use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`: the effective configuration after every layer.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = serde_json::to_value(state.get_config())
        .map_err(|e| AppError::Internal(format!("failed to serialize configuration: {}", e)))?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_get_config_shows_effective_values() {
        let mut config = AppConfig::default();
        config.detection.sensitivity = 0.65;
        let state = AppState::new(config).unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/config").to_request())
                .await;

        assert_eq!(body["config"]["detection"]["sensitivity"], 0.65);
        assert_eq!(body["config"]["detection"]["backend"], "energy");
        assert_eq!(body["config"]["server"]["port"], 10400);
    }
}
