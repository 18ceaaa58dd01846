use std::time::Duration;

use futures::future::join_all;

/// Best-effort marketing webhooks fired on registration. Settled as a task
/// list with per-task failure isolation; the primary operation never fails
/// because of these calls.
pub struct MarketingNotifier {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl MarketingNotifier {
    pub fn from_env() -> Self {
        let endpoints = std::env::var("MARKETING_WEBHOOK_URLS")
            .map(|raw| parse_endpoints(&raw))
            .unwrap_or_default();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, endpoints }
    }

    pub fn is_enabled(&self) -> bool {
        !self.endpoints.is_empty()
    }

    pub async fn announce_registration(&self, user_id: &str, email: &str) {
        if self.endpoints.is_empty() {
            return;
        }

        let payload = serde_json::json!({
            "event": "user_registered",
            "userId": user_id,
            "email": email,
        });

        let tasks = self.endpoints.iter().map(|url| {
            let client = self.client.clone();
            let payload = payload.clone();
            let url = url.clone();
            async move {
                let result = client.post(&url).json(&payload).send().await;
                (url, result)
            }
        });

        for (url, result) in join_all(tasks).await {
            match result {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    tracing::warn!(url = %url, status = %response.status(), "marketing webhook rejected");
                }
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "marketing webhook failed");
                }
            }
        }
    }
}

fn parse_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_endpoints;

    #[test]
    fn parses_comma_separated_urls() {
        let endpoints = parse_endpoints("https://a.example/hook, https://b.example/hook ,");
        assert_eq!(
            endpoints,
            vec!["https://a.example/hook", "https://b.example/hook"]
        );
    }

    #[test]
    fn empty_value_yields_no_endpoints() {
        assert!(parse_endpoints("").is_empty());
        assert!(parse_endpoints(" , ").is_empty());
    }
}
