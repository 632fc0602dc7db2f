use url::Url;

/// Validate that the endpoint parses and uses a WebSocket scheme.
pub fn validate_endpoint(endpoint: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = Url::parse(endpoint).map_err(|e| format!("invalid VOICELINK_ENDPOINT: {e}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!(
            "VOICELINK_ENDPOINT must use ws:// or wss://, got {other}://"
        )
        .into()),
    }
}

/// Validate that both credentials required by the dial headers are present.
pub fn validate_credentials(
    app_id: &str,
    access_key: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if app_id.is_empty() {
        return Err("VOICELINK_APP_ID is required".into());
    }
    if access_key.is_empty() {
        return Err("VOICELINK_ACCESS_KEY is required".into());
    }
    Ok(())
}
