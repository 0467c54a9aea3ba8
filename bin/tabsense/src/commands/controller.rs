use tabsense_client::ControllerClient;
use tabsense_core::protocol::CommandEnvelope;
use tabsense_core::search::SearchFilters;

pub async fn status(gateway: &str) -> anyhow::Result<()> {
    let url = format!("{}/status", gateway.trim_end_matches('/'));
    let status: serde_json::Value = reqwest::get(&url).await?.json().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub async fn tabs(gateway: &str) -> anyhow::Result<()> {
    let (client, _events) = ControllerClient::connect(gateway).await?;
    let tabs = client.list_tabs().await?;
    if tabs.is_empty() {
        println!("No tabs connected.");
        return Ok(());
    }
    for tab in tabs {
        println!(
            "{:>4}  {:<50}  {} candidates  ({}x{})",
            tab.tab_id,
            tab.url,
            tab.candidate_count,
            tab.viewport.width,
            tab.viewport.height
        );
    }
    Ok(())
}

pub async fn query(
    gateway: &str,
    tab: u64,
    search: Option<&str>,
    role: Option<String>,
    tag: Option<String>,
) -> anyhow::Result<()> {
    let (client, _events) = ControllerClient::connect(gateway).await?;
    let filters = if role.is_some() || tag.is_some() {
        Some(SearchFilters {
            role,
            tag,
            ..Default::default()
        })
    } else {
        None
    };
    let matches = client.query(tab, search, filters).await?;
    if matches.is_empty() {
        println!("No matches.");
        return Ok(());
    }
    for c in matches {
        println!(
            "{:<12}  {:<10}  {:<40}  at ({}, {})",
            c.id, c.role, c.name, c.hit.cx, c.hit.cy
        );
    }
    Ok(())
}

/// Parse the command JSON (e.g. `{"type":"click","id":"a_0"}`), stamp the
/// tab id, submit, and print the ack.
pub async fn act(gateway: &str, tab: u64, command_json: &str) -> anyhow::Result<()> {
    let mut value: serde_json::Value = serde_json::from_str(command_json)?;
    match value.as_object_mut() {
        Some(obj) => obj.insert("tabId".to_string(), serde_json::json!(tab)),
        None => anyhow::bail!("command must be a JSON object"),
    };
    let command: CommandEnvelope = serde_json::from_value(value)?;

    let (client, _events) = ControllerClient::connect(gateway).await?;
    let (command_id, ack) = client.act(command).await?;
    println!("{} -> {}", command_id, serde_json::to_string_pretty(&ack)?);
    Ok(())
}

pub async fn navigate(gateway: &str, url: &str) -> anyhow::Result<()> {
    let (client, _events) = ControllerClient::connect(gateway).await?;
    client.navigate(url).await?;
    println!("Navigated to {}", url);
    Ok(())
}
