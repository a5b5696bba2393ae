use crate::error::ScheduleUnavailable;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{TimingsRequest, TimingsSource};

/// Client for the public Aladhan prayer times API.
#[derive(Debug, Clone)]
pub struct AladhanClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    timings: HashMap<String, String>,
}

impl AladhanClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ScheduleUnavailable> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, request: &TimingsRequest) -> String {
        format!(
            "{}/timingsByCity/{}",
            self.base_url,
            request.date.format("%d-%m-%Y")
        )
    }
}

/// Pull the timings map out of a raw response body.
pub fn parse_response(body: &str) -> Result<HashMap<String, String>, ScheduleUnavailable> {
    let response: ApiResponse = serde_json::from_str(body).map_err(|e| ScheduleUnavailable::Api {
        code: 0,
        message: format!("undecodable body: {}", e),
    })?;

    if response.code != 200 {
        // on errors `data` carries the human readable reason
        let message = response
            .data
            .as_str()
            .map(str::to_string)
            .or(response.status)
            .unwrap_or_default();
        return Err(ScheduleUnavailable::Api {
            code: response.code,
            message,
        });
    }

    let data: ApiData = serde_json::from_value(response.data)
        .map_err(|_| ScheduleUnavailable::MissingPrayer("timings".to_string()))?;
    Ok(data.timings)
}

#[async_trait]
impl TimingsSource for AladhanClient {
    async fn fetch_timings(
        &self,
        request: &TimingsRequest,
    ) -> Result<HashMap<String, String>, ScheduleUnavailable> {
        let url = self.endpoint(request);
        debug!("GET {} city={} country={} method={}", url, request.city, request.country, request.method);

        let body = self
            .http
            .get(&url)
            .query(&[
                ("city", request.city.clone()),
                ("country", request.country.clone()),
                ("method", request.method.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_success_body() {
        let body = r#"{
            "code": 200,
            "status": "OK",
            "data": {
                "timings": {
                    "Fajr": "05:12", "Sunrise": "06:30", "Dhuhr": "11:45",
                    "Asr": "15:04", "Sunset": "17:20", "Maghrib": "17:20",
                    "Isha": "18:37", "Imsak": "05:02", "Midnight": "23:32"
                },
                "date": { "readable": "16 Oct 2026" }
            }
        }"#;

        let timings = parse_response(body).unwrap();
        assert_eq!(timings["Fajr"], "05:12");
        assert_eq!(timings["Isha"], "18:37");
    }

    #[test]
    fn test_parse_api_error() {
        let body = r#"{"code": 400, "status": "BAD_REQUEST", "data": "Unable to locate city"}"#;

        match parse_response(body).unwrap_err() {
            ScheduleUnavailable::Api { code, message } => {
                assert_eq!(code, 400);
                assert_eq!(message, "Unable to locate city");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_response("<html>502</html>"),
            Err(ScheduleUnavailable::Api { code: 0, .. })
        ));
    }

    #[test]
    fn test_endpoint_uses_day_month_year() {
        let client = AladhanClient::new("http://api.aladhan.com/v1/", Duration::from_secs(10)).unwrap();
        let request = TimingsRequest {
            date: NaiveDate::from_ymd_opt(2026, 3, 7).unwrap(),
            city: "Kuwait City".to_string(),
            country: "Kuwait".to_string(),
            method: 2,
        };
        assert_eq!(
            client.endpoint(&request),
            "http://api.aladhan.com/v1/timingsByCity/07-03-2026"
        );
    }
}
