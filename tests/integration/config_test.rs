//! Configuration files feeding a working client.

use bucketline::config::{load_config, render_config, WritePolicy};
use bucketline::ObjectClient;
use bytes::Bytes;
use std::io::Write;
use std::time::Duration;

use crate::common::FakeS3;

const CONFIG_YAML: &str = r#"
logging:
  level: debug
  format: json
storage:
  bucket_names: primary-bucket, archive-bucket
  endpoint: http://fake-s3.local
  region: eu-west-1
  s3_force_path_style: true
  access_key_id: AKIDEXAMPLE
  secret_access_key: very-secret-key
  session_token: very-secret-token
  backoff_config:
    max_retries: 0
    min_period: 10ms
    max_period: 1s
    write_policy: never
  hedging:
    at: 250ms
    up_to: 2
    max_per_second: 10
  list_max_pages: 50
"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(CONFIG_YAML);
    let config = load_config(file.path()).unwrap();

    assert_eq!(config.logging.format, "json");
    let storage = &config.storage;
    assert_eq!(storage.bucket_names, vec!["primary-bucket", "archive-bucket"]);
    assert_eq!(storage.region, "eu-west-1");
    assert_eq!(storage.secret_access_key.reveal(), "very-secret-key");
    assert_eq!(storage.session_token.reveal(), "very-secret-token");
    assert_eq!(storage.backoff_config.max_retries, 0);
    assert_eq!(storage.backoff_config.min_period, Duration::from_millis(10));
    assert_eq!(storage.backoff_config.write_policy, WritePolicy::Never);
    assert_eq!(storage.hedging.at, Duration::from_millis(250));
    assert_eq!(storage.hedging.max_per_second, 10);
    assert_eq!(storage.list_max_pages, 50);
}

#[test]
fn test_rendered_config_masks_secrets() {
    let file = write_config(CONFIG_YAML);
    let rendered = render_config(&load_config(file.path()).unwrap()).unwrap();

    assert!(rendered.contains("AKIDEXAMPLE"));
    assert!(!rendered.contains("very-secret-key"));
    assert!(!rendered.contains("very-secret-token"));
    assert!(rendered.contains("250ms"));
}

#[test]
fn test_invalid_bucket_name_is_rejected() {
    let file = write_config("storage:\n  bucket_names: [Not_A_Bucket]\n");
    assert!(load_config(file.path()).is_err());
}

#[tokio::test]
async fn test_loaded_config_drives_client() {
    let file = write_config(CONFIG_YAML);
    let config = load_config(file.path()).unwrap();

    let fake = FakeS3::new(&["primary-bucket", "archive-bucket"], 1000);
    let client = ObjectClient::with_base_executor(&config.storage, fake.executor()).unwrap();

    client.put_object("k", Bytes::from("v")).await.unwrap();
    assert_eq!(client.get_object("k").await.unwrap().data, Bytes::from("v"));

    let put = &fake.requests()[0];
    assert_eq!(put.path, "/primary-bucket/k");
    let auth = put.headers.get("authorization").unwrap().to_str().unwrap();
    assert!(auth.contains("/eu-west-1/s3/"), "{auth}");
}
