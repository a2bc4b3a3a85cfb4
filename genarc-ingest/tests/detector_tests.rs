//! Source detection across provider payload shapes

use genarc_ingest::providers::{detect, Provider, DETECTION_ORDER};
use serde_json::json;

#[test]
fn test_each_provider_is_detected() {
    let cases = vec![
        (json!({"__typename": "CreationV2", "id": "1"}), Provider::StarryAi),
        (json!({"source": "Novita", "images": [{"image_url": "u"}]}), Provider::Novita),
        (json!({"pageProps": {"initialJob": {"id": "j"}, "cid": "c"}}), Provider::NightCafe),
        (json!({"_id": "d1", "meta": {"file.output": "o"}, "type": "job"}), Provider::Dezgo),
        (json!({"inferenceId": "h1", "inferencePayload": {"prompt": "x"}}), Provider::HappyAccidents),
        (
            json!({"genInfo": {"lighting_filter": "dynamic-contrast"}, "original": "u", "prefix": "p"}),
            Provider::Unstability,
        ),
        (
            json!({"metadata": {"model_version": "v"}, "model_version": "v", "blurhash": "b"}),
            Provider::MageSpace,
        ),
        (
            json!({"status": "Succeeded", "params": {"prompt": "x"}, "resources": [{}], "baseModel": "SD1"}),
            Provider::Civitai,
        ),
    ];
    for (raw, expected) in cases {
        assert_eq!(detect(&raw), Some(expected), "payload {}", raw);
    }
}

#[test]
fn test_overlapping_payload_resolves_to_earlier_provider() {
    // NightCafe and Civitai both accept this shape
    let raw = json!({
        "id": "abc",
        "status": "Succeeded",
        "runtime": 50,
        "algorithm": "diffusion2",
        "params": {"prompt": "x"},
        "resources": [{}],
        "baseModel": "SDXL"
    });
    assert!(Provider::Civitai.is_match(&raw));
    assert_eq!(detect(&raw), Some(Provider::NightCafe));

    let earlier = DETECTION_ORDER.iter().position(|p| *p == Provider::NightCafe);
    let later = DETECTION_ORDER.iter().position(|p| *p == Provider::Civitai);
    assert!(earlier < later);
}

#[test]
fn test_unknown_payload_is_not_detected() {
    assert_eq!(detect(&json!({"id": 1, "status": "done"})), None);
    assert_eq!(detect(&json!("text")), None);
}
