use std::time::{SystemTime, UNIX_EPOCH};

use platform_core::{CloudflareClient, RequestOptions, VaultClient};
use serde_json::json;

fn env_is_set(name: &str) -> bool {
    std::env::var(name)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be after epoch")
        .as_millis()
}

#[tokio::test]
async fn live_cloudflare_zone_listing() {
    if !env_is_set("CLOUDFLARE_API_TOKEN") {
        eprintln!("skipping live test: CLOUDFLARE_API_TOKEN is not set");
        return;
    }

    let client = CloudflareClient::from_env().expect("client must build from env");
    let zones = client.list_zones().await.expect("zone listing must succeed");

    if let Some(zone) = zones.first() {
        let zone_id = client
            .zone_id_by_name(&zone.name)
            .await
            .expect("listed zone must resolve by name");
        assert_eq!(zone_id, zone.id);
    }

    let err = client
        .zone_id_by_name(&format!("missing-{}.invalid", unique_suffix()))
        .await
        .expect_err("unknown zone must not resolve");
    assert!(err.is_not_found());
}

#[tokio::test]
async fn live_vault_kv2_roundtrip() {
    if !env_is_set("VAULT_ADDR") || !env_is_set("VAULT_TOKEN") {
        eprintln!("skipping live test: VAULT_ADDR/VAULT_TOKEN are not set");
        return;
    }

    let client = VaultClient::from_env().expect("client must build from env");
    let mount = std::env::var("VAULT_KV_MOUNT").unwrap_or_else(|_| "secret".to_owned());
    let path = format!("platform-core-live/{}", unique_suffix());
    let opts = RequestOptions::default();

    client
        .write_kv2(&mount, &path, &json!({"probe": "ok"}), &opts)
        .await
        .expect("write must succeed");
    let data = client
        .read_kv2(&mount, &path, &opts)
        .await
        .expect("read must succeed");
    assert_eq!(data.get("probe"), Some(&json!("ok")));

    let err = client
        .read_kv2(&mount, &format!("{path}-absent"), &opts)
        .await
        .expect_err("absent secret must not be readable");
    assert!(err.is_not_found());
}
