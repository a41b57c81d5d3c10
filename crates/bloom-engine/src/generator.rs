use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bloom_contracts::routine::{RoutineRequest, MAX_CONCERNS, MIN_CONCERNS, SECTION_IDS};
use serde_json::{json, Value};

use crate::config::GeneratorConfig;
use crate::error::truncate_text;
use crate::transport::{HttpRequest, HttpTransport, Method};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Free-text completion backend used to draft routines.
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// Gemini `generateContent` over the shared HTTP transport.
pub struct GeminiTextGenerator {
    config: GeneratorConfig,
    transport: Arc<dyn HttpTransport>,
}

impl GeminiTextGenerator {
    pub fn new(config: GeneratorConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    fn endpoint(&self) -> String {
        let model = self.config.model.trim();
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    fn extract_text(payload: &Value) -> String {
        payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for GeminiTextGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiTextGenerator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TextGenerator for GeminiTextGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let payload = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": 0.4,
                "responseMimeType": "application/json"
            }
        });
        // Transport errors quote the URL; the key stays out of it.
        let request = HttpRequest::new(Method::POST, self.endpoint())
            .header("Content-Type", "application/json")
            .header(API_KEY_HEADER, self.config.api_key.clone())
            .body(payload.to_string().into_bytes());
        let reply = self
            .transport
            .send(request)
            .map_err(|err| anyhow::anyhow!(err))
            .with_context(|| format!("Gemini request failed (model {})", self.config.model))?;
        let body = reply.text();
        if !reply.is_success() {
            bail!(
                "Gemini request failed ({}): {}",
                reply.status,
                truncate_text(&body, 512)
            );
        }
        let parsed: Value =
            serde_json::from_str(&body).context("Gemini returned invalid JSON payload")?;
        let text = Self::extract_text(&parsed);
        if text.trim().is_empty() {
            bail!("Gemini response contained no text parts");
        }
        Ok(text)
    }
}

/// Prompt asking for a routine as one JSON object. Only the caller's metric
/// ids are offered as concerns.
pub fn build_routine_prompt(request: &RoutineRequest) -> String {
    let metrics = request.skin_metrics.as_deref().unwrap_or_default();
    let mut prompt = String::from(
        "You are a skincare assistant. Build a personal skincare routine from the \
         skin analysis below.\n\nSkin metrics (id, label, score):\n",
    );
    for metric in metrics {
        let _ = writeln!(prompt, "- {} ({}): {:.1}", metric.id, metric.label, metric.value);
    }
    if let Some(health) = request.overall_health {
        let _ = writeln!(prompt, "\nOverall skin health: {health:.1}");
    }
    let ids: Vec<&str> = metrics.iter().map(|metric| metric.id.as_str()).collect();
    let _ = write!(
        prompt,
        "\nPick between {MIN_CONCERNS} and {MAX_CONCERNS} main concerns, using only these ids: {}.\n",
        ids.join(", ")
    );
    let _ = write!(
        prompt,
        "Return exactly one JSON object and nothing else, with this shape:\n{}\n\
         The sections must be {} in that order. Step targets are metric ids.",
        routine_schema_example(),
        SECTION_IDS.join(", ")
    );
    prompt
}

fn routine_schema_example() -> String {
    let section = |id: &str| {
        json!({
            "id": id,
            "title": "string",
            "steps": [{"name": "string", "instruction": "string", "targets": ["metric id"]}]
        })
    };
    json!({
        "summary": "string",
        "mainConcerns": ["metric id"],
        "sections": SECTION_IDS.iter().map(|id| section(id)).collect::<Vec<_>>(),
        "disclaimer": "string"
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bloom_contracts::metrics::Metric;
    use bloom_contracts::routine::RoutineRequest;
    use serde_json::json;

    use super::{build_routine_prompt, GeminiTextGenerator, TextGenerator};
    use crate::config::GeneratorConfig;
    use crate::testing::ScriptedTransport;
    use crate::transport::Method;

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            api_base: "https://gemini.test/v1beta".to_string(),
            api_key: "g-key".to_string(),
            model: "gemini-2.0-flash".to_string(),
        }
    }

    #[test]
    fn generate_concatenates_first_candidate_parts() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::POST,
            ":generateContent",
            200,
            json!({"candidates": [
                {"content": {"parts": [{"text": "{\"summary\":"}, {"text": "\"ok\"}"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]}),
        ));
        let generator = GeminiTextGenerator::new(config(), transport.clone());
        assert_eq!(generator.generate("hi")?, "{\"summary\":\"ok\"}");

        let requests = transport.requests();
        let request = &requests[0];
        assert_eq!(
            request.url,
            "https://gemini.test/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert!(!request.url.contains("g-key"));
        assert_eq!(request.header_value("x-goog-api-key"), Some("g-key"));
        let body = request.json_body().unwrap_or_default();
        assert_eq!(body["contents"][0]["parts"][0]["text"], json!("hi"));
        Ok(())
    }

    #[test]
    fn http_errors_and_empty_candidates_fail() {
        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::POST,
            ":generateContent",
            429,
            json!({"error": {"message": "quota"}}),
        ));
        let generator = GeminiTextGenerator::new(config(), transport);
        let err = generator.generate("hi").err().map(|err| format!("{err:#}"));
        assert!(err.unwrap_or_default().contains("429"));

        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::POST,
            ":generateContent",
            200,
            json!({"candidates": []}),
        ));
        let generator = GeminiTextGenerator::new(config(), transport);
        assert!(generator.generate("hi").is_err());
    }

    #[test]
    fn prompt_lists_metrics_and_allowed_ids() {
        let request = RoutineRequest {
            skin_metrics: Some(vec![
                Metric::new("acne", "Acne", 42.0),
                Metric::new("dark_circles", "Dark Circles", 61.3),
            ]),
            overall_health: Some(77.0),
        };
        let prompt = build_routine_prompt(&request);
        assert!(prompt.contains("- acne (Acne): 42.0"));
        assert!(prompt.contains("- dark_circles (Dark Circles): 61.3"));
        assert!(prompt.contains("Overall skin health: 77.0"));
        assert!(prompt.contains("only these ids: acne, dark_circles."));
        assert!(prompt.contains("\"mainConcerns\""));
        assert!(prompt.contains("morning, evening, weekly"));
    }
}
