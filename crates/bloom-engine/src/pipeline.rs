use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use bloom_contracts::events::{ScanEvent, ScanEventLog};
use bloom_contracts::scan::{ScanIdentifiers, DEFAULT_SUBJECT_NAME};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::client::InferenceClient;
use crate::config::VendorConfig;
use crate::error::{truncate_text, ScanError};
use crate::transport::{HttpRequest, Method};

const FRONT_SIDE: &str = "front";

/// Standard alphabet, padding optional. URL-safe input is mapped onto it first.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decoded image bytes, validated before any vendor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    bytes: Vec<u8>,
}

impl ImagePayload {
    /// Accepts plain base64 or a `data:<mime>;base64,` URI, padded or not,
    /// in the standard or URL-safe alphabet.
    pub fn from_encoded(encoded: &str) -> Result<Self, ScanError> {
        let trimmed = encoded.trim();
        let data = match trimmed.strip_prefix("data:") {
            Some(rest) => rest
                .split_once(',')
                .map(|(_, data)| data)
                .ok_or_else(|| ScanError::InvalidInput("malformed data URI".to_string()))?,
            None => trimmed,
        };
        let compact: String = data
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| match ch {
                '-' => '+',
                '_' => '/',
                other => other,
            })
            .collect();
        if compact.is_empty() {
            return Err(ScanError::InvalidInput("image payload is empty".to_string()));
        }
        let bytes = LENIENT_BASE64
            .decode(compact.as_bytes())
            .map_err(|err| ScanError::InvalidInput(format!("image is not valid base64: {err}")))?;
        if bytes.is_empty() {
            return Err(ScanError::InvalidInput("image payload is empty".to_string()));
        }
        Ok(Self { bytes })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

/// Where and how the vendor wants the image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUpload {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    pub batch_id: String,
    pub image_id: Option<String>,
    pub front: SignedUpload,
}

/// The four vendor stages of a scan, in order: subject, upload slot, bytes,
/// compute. Every stage fails fast; nothing is rolled back.
pub struct UploadPipeline<'a> {
    client: &'a InferenceClient,
    company_id: &'a str,
    dataset_id: &'a str,
    events: Option<&'a ScanEventLog>,
}

impl<'a> UploadPipeline<'a> {
    pub fn new(client: &'a InferenceClient, config: &'a VendorConfig) -> Self {
        Self {
            client,
            company_id: &config.company_id,
            dataset_id: &config.dataset_id,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<&'a ScanEventLog>) -> Self {
        self.events = events;
        self
    }

    pub fn run(
        &self,
        image: &ImagePayload,
        display_name: Option<&str>,
    ) -> Result<ScanIdentifiers, ScanError> {
        let subject_id = self.create_subject(display_name)?;
        let ticket = self.initiate_upload(&subject_id)?;
        self.upload_bytes(&ticket.front, image)?;
        self.trigger_compute(&ticket.batch_id)?;
        Ok(ScanIdentifiers {
            company_id: self.company_id.to_string(),
            dataset_id: self.dataset_id.to_string(),
            subject_id,
            batch_id: ticket.batch_id,
            image_id: ticket.image_id,
        })
    }

    /// Returns the new subject id; never empty.
    pub fn create_subject(&self, display_name: Option<&str>) -> Result<String, ScanError> {
        let name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_SUBJECT_NAME);
        let path = format!(
            "/api/v1/companies/{}/datasets/{}/subjects/",
            self.company_id, self.dataset_id
        );
        let response = self.client.post(&path, &json!({ "name": name }))?;
        let Some(subject_id) = id_text(response.body.get("id")) else {
            return Err(ScanError::SubjectCreation {
                body: response.body,
            });
        };
        tracing::info!(subject_id = %subject_id, "subject created");
        self.record(ScanEvent::SubjectCreated {
            subject_id: subject_id.clone(),
        });
        Ok(subject_id)
    }

    pub fn initiate_upload(&self, subject_id: &str) -> Result<UploadTicket, ScanError> {
        let path = format!(
            "/api/v3/companies/{}/subjects/{}/upload/",
            self.company_id, subject_id
        );
        let response = self
            .client
            .post(&path, &json!({ "side_ids": [FRONT_SIDE] }))?;
        let ticket = parse_upload_ticket(response.body)?;
        tracing::info!(batch_id = %ticket.batch_id, "upload initiated");
        self.record(ScanEvent::UploadInitiated {
            batch_id: ticket.batch_id.clone(),
            image_id: ticket.image_id.clone(),
        });
        Ok(ticket)
    }

    /// Pushes the bytes to signed storage with the vendor's headers only.
    pub fn upload_bytes(&self, target: &SignedUpload, image: &ImagePayload) -> Result<(), ScanError> {
        let mut request = HttpRequest::new(target.method.clone(), target.url.clone());
        for (name, value) in &target.headers {
            request = request.header(name.clone(), value.clone());
        }
        let request = request.body(image.bytes().to_vec());
        let reply = self
            .client
            .transport()
            .send(request)
            .map_err(|source| ScanError::Transport {
                url: target.url.clone(),
                source,
            })?;
        if !reply.is_success() {
            return Err(ScanError::StorageUpload {
                status: reply.status,
                body: truncate_text(&reply.text(), 512),
            });
        }
        let digest = image.sha256_hex();
        tracing::info!(bytes = image.len(), sha256 = %digest, "image uploaded");
        self.record(ScanEvent::ImageUploaded {
            bytes: image.len(),
            sha256: digest,
        });
        Ok(())
    }

    pub fn trigger_compute(&self, batch_id: &str) -> Result<(), ScanError> {
        let path = format!(
            "/api/v3/companies/{}/batches/{}/compute/",
            self.company_id, batch_id
        );
        self.client
            .post(&path, &json!({ "app_args": {} }))
            .map_err(|err| match err {
                ScanError::Remote { status, body } => ScanError::ComputeTrigger { status, body },
                other => other,
            })?;
        tracing::info!(batch_id, "compute triggered");
        self.record(ScanEvent::ComputeTriggered {
            batch_id: batch_id.to_string(),
        });
        Ok(())
    }

    fn record(&self, event: ScanEvent) {
        if let Some(events) = self.events {
            events.record(event);
        }
    }
}

fn parse_upload_ticket(body: Value) -> Result<UploadTicket, ScanError> {
    let Some(batch_id) = id_text(body.get("image_batch_id")) else {
        return Err(ScanError::UploadInit {
            missing: "image_batch_id",
            body,
        });
    };
    let Some(front) = body.get(FRONT_SIDE).and_then(Value::as_object) else {
        return Err(ScanError::UploadInit {
            missing: "front",
            body,
        });
    };
    let Some(url) = front
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
    else {
        return Err(ScanError::UploadInit {
            missing: "front.url",
            body,
        });
    };

    let method = front
        .get("method")
        .and_then(Value::as_str)
        .and_then(|raw| Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes()).ok())
        .unwrap_or(Method::PUT);
    let headers = front
        .get("headers")
        .and_then(Value::as_object)
        .map(header_pairs)
        .unwrap_or_default();
    let image_id = id_text(front.get("image_id")).or_else(|| id_text(body.get("image_id")));

    Ok(UploadTicket {
        batch_id,
        image_id,
        front: SignedUpload {
            url: url.to_string(),
            method,
            headers,
        },
    })
}

fn header_pairs(headers: &Map<String, Value>) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => return None,
            };
            Some((name.clone(), value))
        })
        .collect()
}

/// Vendor ids arrive as strings or numbers.
fn id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{ImagePayload, UploadPipeline};
    use crate::client::InferenceClient;
    use crate::error::ScanError;
    use crate::testing::{vendor_config, ScriptedTransport};
    use crate::transport::Method;

    const SUBJECTS: &str = "/datasets/dataset-1/subjects/";
    const UPLOAD: &str = "/subjects/subject-1/upload/";
    const COMPUTE: &str = "/batches/batch-1/compute/";
    const STORAGE: &str = "https://storage.test/";

    fn upload_reply() -> serde_json::Value {
        json!({
            "image_batch_id": "batch-1",
            "front": {
                "url": "https://storage.test/signed?sig=abc",
                "method": "put",
                "headers": {"Content-Type": "image/jpeg", "x-amz-acl": "private"},
                "image_id": "image-1"
            }
        })
    }

    #[test]
    fn image_payload_accepts_plain_and_data_uri() -> anyhow::Result<()> {
        let plain = ImagePayload::from_encoded("AAA=")?;
        assert_eq!(plain.bytes(), &[0u8, 0u8]);
        let uri = ImagePayload::from_encoded("data:image/jpeg;base64,AAA=")?;
        assert_eq!(uri, plain);
        assert_eq!(plain.sha256_hex().len(), 64);
        Ok(())
    }

    #[test]
    fn image_payload_tolerates_unpadded_and_url_safe_encoders() -> anyhow::Result<()> {
        assert_eq!(ImagePayload::from_encoded("AAA")?.bytes(), &[0u8, 0u8]);
        assert_eq!(ImagePayload::from_encoded("data:image/png;base64,AAA")?.bytes(), &[0u8, 0u8]);
        // 0xfb 0xff encodes as "+/8=" in the standard alphabet and "-_8" URL-safe.
        assert_eq!(ImagePayload::from_encoded("+/8=")?.bytes(), &[0xfbu8, 0xff]);
        assert_eq!(ImagePayload::from_encoded("-_8")?.bytes(), &[0xfbu8, 0xff]);
        assert!(ImagePayload::from_encoded("A").is_err());
        Ok(())
    }

    #[test]
    fn image_payload_rejects_bad_input_as_400() {
        for raw in ["", "   ", "data:image/png;base64,", "not base64!", "data:image/png"] {
            match ImagePayload::from_encoded(raw) {
                Err(err @ ScanError::InvalidInput(_)) => assert_eq!(err.status(), 400, "{raw}"),
                other => panic!("{raw}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn create_subject_defaults_name_and_accepts_numeric_ids() -> anyhow::Result<()> {
        let transport =
            Arc::new(ScriptedTransport::new().reply(Method::POST, SUBJECTS, 201, json!({"id": 42})));
        let client = InferenceClient::new(&vendor_config(), transport.clone());
        let config = vendor_config();
        let pipeline = UploadPipeline::new(&client, &config);

        assert_eq!(pipeline.create_subject(Some("   "))?, "42");
        let requests = transport.requests();
        assert_eq!(
            requests[0].url,
            "https://vendor.test/api/v1/companies/company-1/datasets/dataset-1/subjects/"
        );
        assert_eq!(requests[0].json_body(), Some(json!({"name": "Bloom Web User"})));
        Ok(())
    }

    #[test]
    fn subject_without_id_is_an_error() {
        for body in [json!({}), json!({"id": ""}), json!({"id": null}), json!("created")] {
            let transport =
                Arc::new(ScriptedTransport::new().reply(Method::POST, SUBJECTS, 201, body.clone()));
            let client = InferenceClient::new(&vendor_config(), transport);
            let config = vendor_config();
            let outcome = UploadPipeline::new(&client, &config).create_subject(Some("Ana"));
            assert!(
                matches!(outcome, Err(ScanError::SubjectCreation { .. })),
                "{body}: {outcome:?}"
            );
        }
    }

    #[test]
    fn upload_init_parses_ticket_and_defaults_method() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::POST,
            UPLOAD,
            200,
            json!({"image_batch_id": 9, "image_id": "top", "front": {"url": STORAGE}}),
        ));
        let client = InferenceClient::new(&vendor_config(), transport.clone());
        let config = vendor_config();
        let ticket = UploadPipeline::new(&client, &config).initiate_upload("subject-1")?;

        assert_eq!(ticket.batch_id, "9");
        assert_eq!(ticket.image_id.as_deref(), Some("top"));
        assert_eq!(ticket.front.method, Method::PUT);
        assert!(ticket.front.headers.is_empty());
        assert_eq!(
            transport.requests()[0].json_body(),
            Some(json!({"side_ids": ["front"]}))
        );
        Ok(())
    }

    #[test]
    fn upload_init_names_the_missing_piece() {
        let cases = [
            (json!({"front": {"url": STORAGE}}), "image_batch_id"),
            (json!({"image_batch_id": "b"}), "front"),
            (json!({"image_batch_id": "b", "front": {"method": "PUT"}}), "front.url"),
        ];
        for (body, expected) in cases {
            let transport =
                Arc::new(ScriptedTransport::new().reply(Method::POST, UPLOAD, 200, body));
            let client = InferenceClient::new(&vendor_config(), transport);
            let config = vendor_config();
            match UploadPipeline::new(&client, &config).initiate_upload("subject-1") {
                Err(ScanError::UploadInit { missing, .. }) => assert_eq!(missing, expected),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn run_sends_bytes_without_auth_and_triggers_compute() -> anyhow::Result<()> {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::POST, SUBJECTS, 201, json!({"id": "subject-1"}))
                .reply(Method::POST, UPLOAD, 200, upload_reply())
                .reply_text(Method::PUT, STORAGE, 200, "")
                .reply(Method::POST, COMPUTE, 202, json!({"status": "queued"})),
        );
        let client = InferenceClient::new(&vendor_config(), transport.clone());
        let config = vendor_config();
        let image = ImagePayload::from_encoded("AAA=")?;

        let ids = UploadPipeline::new(&client, &config).run(&image, Some("Ana"))?;
        assert_eq!(ids.subject_id, "subject-1");
        assert_eq!(ids.batch_id, "batch-1");
        assert_eq!(ids.image_id.as_deref(), Some("image-1"));

        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        let put = &requests[2];
        assert_eq!(put.method, Method::PUT);
        assert_eq!(put.url, "https://storage.test/signed?sig=abc");
        assert_eq!(put.body.as_deref(), Some(&[0u8, 0u8][..]));
        assert_eq!(put.header_value("content-type"), Some("image/jpeg"));
        assert!(put.header_value("authorization").is_none());
        assert_eq!(requests[3].json_body(), Some(json!({"app_args": {}})));
        Ok(())
    }

    #[test]
    fn storage_and_compute_failures_are_typed() -> anyhow::Result<()> {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::POST, SUBJECTS, 201, json!({"id": "subject-1"}))
                .reply(Method::POST, UPLOAD, 200, upload_reply())
                .reply_text(Method::PUT, STORAGE, 403, "<Error>SignatureDoesNotMatch</Error>"),
        );
        let client = InferenceClient::new(&vendor_config(), transport.clone());
        let config = vendor_config();
        let image = ImagePayload::from_encoded("AAA=")?;
        match UploadPipeline::new(&client, &config).run(&image, None) {
            Err(ScanError::StorageUpload { status: 403, body }) => {
                assert!(body.contains("SignatureDoesNotMatch"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(transport.count(&Method::PUT, STORAGE), 1);
        assert_eq!(transport.count(&Method::POST, "/compute/"), 0);

        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::POST,
            COMPUTE,
            422,
            json!({"detail": "no images"}),
        ));
        let client = InferenceClient::new(&vendor_config(), transport);
        match UploadPipeline::new(&client, &config).trigger_compute("batch-1") {
            Err(ScanError::ComputeTrigger { status: 422, body }) => {
                assert_eq!(body, json!({"detail": "no images"}));
            }
            other => panic!("unexpected: {other:?}"),
        }
        Ok(())
    }
}
