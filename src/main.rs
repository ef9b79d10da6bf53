use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabled::{Table, Tabled};

use pentair::fields::{descriptor, translate};
use pentair::redact::REDACT_FIELDS;
use pentair::storage::{self, StoredSession};
use pentair::{ClientConfig, DeviceRecord, PentairClient};

#[derive(Parser)]
#[command(name = "pentair")]
#[command(about = "A CLI for Pentair Home pool and water devices")]
#[command(version)]
struct Cli {
    /// Cognito user pool id (base64-encoded)
    #[arg(long, env = "PENTAIR_USER_POOL_ID", hide_env_values = true)]
    user_pool_id: Option<String>,

    /// Cognito app client id (base64-encoded)
    #[arg(long, env = "PENTAIR_CLIENT_ID", hide_env_values = true)]
    client_id: Option<String>,

    /// Cognito identity pool id (base64-encoded)
    #[arg(long, env = "PENTAIR_IDENTITY_POOL_ID", hide_env_values = true)]
    identity_pool_id: Option<String>,

    /// AWS region hosting the Pentair pools
    #[arg(long, env = "PENTAIR_REGION", default_value = "us-west-2")]
    region: String,

    /// Where tokens are stored between runs (default: ~/.pentair.yml)
    #[arg(long, env = "PENTAIR_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Username for Pentair Home account (optional, will prompt if not provided)
    #[arg(long, env = "PENTAIR_USERNAME", global = true)]
    username: Option<String>,

    /// Password for Pentair Home account (optional, will prompt if not provided)
    #[arg(long, env = "PENTAIR_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Login and store tokens for future use
    Login,
    /// Sign out of all sessions (including the app) and remove stored tokens
    Logout,
    /// List all devices connected to the account
    Devices,
    /// Show the telemetry fields of each device with readable names
    Fields {
        /// Only show this device
        #[arg(long)]
        device: Option<String>,
    },
    /// Poll devices and print what changes between polls
    Watch {
        /// Seconds between polls
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    device_type: String,
    #[tabled(rename = "Device ID")]
    device_id: String,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let token_file = match &cli.token_file {
        Some(path) => path.clone(),
        None => storage::default_path()?,
    };

    match &cli.command {
        Commands::Login => {
            let mut client = PentairClient::new(client_config(&cli)?);
            password_login(&cli, &mut client, None).await?;
            save_tokens(&client, None, &token_file)?;
            println!("Logged in successfully.");
        }
        Commands::Logout => {
            if let Ok(stored) = storage::load(&token_file) {
                if let Err(e) = remote_logout(&cli, stored).await {
                    warn!("Could not sign out remotely: {}", e);
                }
            }
            storage::clear(&token_file)?;
            println!("Logged out successfully.");
        }
        Commands::Devices => {
            let mut connection = connect(&cli, &token_file).await?;
            let devices = connection.client.get_devices().await?;
            connection.save(&token_file)?;

            if devices.is_empty() {
                println!("No devices found for this account.");
                return Ok(());
            }

            let rows: Vec<DeviceRow> = devices.iter().map(device_row).collect();
            println!("{}", Table::new(&rows));
        }
        Commands::Fields { device } => {
            let mut connection = connect(&cli, &token_file).await?;
            let devices = connection.client.get_devices().await?;
            connection.save(&token_file)?;

            let rows: Vec<FieldRow> = devices
                .iter()
                .filter(|d| device.is_none() || d.device_id() == device.as_deref())
                .flat_map(field_rows)
                .collect();

            if rows.is_empty() {
                println!("No telemetry fields found.");
                return Ok(());
            }
            println!("{}", Table::new(&rows));
        }
        Commands::Watch { interval } => {
            let mut connection = connect(&cli, &token_file).await?;
            watch(&mut connection, &token_file, Duration::from_secs(*interval)).await?;
        }
    }

    Ok(())
}

fn client_config(cli: &Cli) -> Result<ClientConfig> {
    let user_pool_id = cli.user_pool_id.as_deref().context(
        "User pool id is required. Provide via --user-pool-id or PENTAIR_USER_POOL_ID.",
    )?;
    let client_id = cli
        .client_id
        .as_deref()
        .context("Client id is required. Provide via --client-id or PENTAIR_CLIENT_ID.")?;
    let identity_pool_id = cli.identity_pool_id.as_deref().context(
        "Identity pool id is required. Provide via --identity-pool-id or PENTAIR_IDENTITY_POOL_ID.",
    )?;

    Ok(ClientConfig::from_encoded(
        user_pool_id,
        client_id,
        identity_pool_id,
        &cli.region,
    )?)
}

/// Restore the stored session, falling back to a password login when the
/// stored tokens are rejected.
async fn connect(cli: &Cli, token_file: &Path) -> Result<Connection> {
    let stored = storage::load(token_file)?;

    let mut client = PentairClient::new(client_config(cli)?);
    let username = stored.username.clone();
    match client.restore_session(stored.tokens).await {
        Ok(()) => {}
        Err(e) if e.is_auth() => {
            warn!("Stored session was rejected ({}), logging in again", e);
            password_login(cli, &mut client, username.as_deref()).await?;
        }
        Err(e) => return Err(e.into()),
    }

    let connection = Connection { client, username };
    connection.save(token_file)?;
    Ok(connection)
}

async fn remote_logout(cli: &Cli, stored: StoredSession) -> Result<()> {
    let mut client = PentairClient::new(client_config(cli)?);
    client.restore_session(stored.tokens).await?;
    client.logout().await?;
    Ok(())
}

async fn password_login(
    cli: &Cli,
    client: &mut PentairClient,
    known_username: Option<&str>,
) -> Result<()> {
    let username = match cli.username.as_deref().or(known_username) {
        Some(u) => u.to_string(),
        None => prompt("Enter username: ")?,
    };
    let password = match &cli.password {
        Some(p) => p.clone(),
        None => rpassword::prompt_password("Enter password: ")?,
    };

    info!("Authenticating with Pentair Home...");
    client.authenticate(&username, &password).await?;
    Ok(())
}

/// A connected client plus the username its tokens belong to, which a
/// restored session does not know by itself.
struct Connection {
    client: PentairClient,
    username: Option<String>,
}

impl Connection {
    fn save(&self, token_file: &Path) -> Result<()> {
        save_tokens(&self.client, self.username.as_deref(), token_file)
    }
}

fn save_tokens(client: &PentairClient, username: Option<&str>, token_file: &Path) -> Result<()> {
    if let Some(tokens) = client.tokens() {
        let username = client.session().username().or(username);
        storage::save(token_file, &StoredSession::new(username, tokens))?;
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn device_label(device: &DeviceRecord) -> String {
    device
        .name()
        .or(device.device_id())
        .unwrap_or("Unnamed")
        .to_string()
}

fn device_row(device: &DeviceRecord) -> DeviceRow {
    DeviceRow {
        name: device_label(device),
        device_type: device.device_type().unwrap_or("Unknown").to_string(),
        device_id: device.device_id().unwrap_or("-").to_string(),
        status: if device.is_online() {
            "Online".to_string()
        } else {
            "Offline".to_string()
        },
    }
}

fn field_rows(device: &DeviceRecord) -> Vec<FieldRow> {
    let Some(fields) = device.fields() else {
        return Vec::new();
    };
    fields
        .iter()
        .map(|(code, raw)| {
            let (name, value) = translate(code, raw);
            FieldRow {
                device: device_label(device),
                code: code.clone(),
                name,
                value: value.to_string(),
            }
        })
        .collect()
}

/// Poll forever, printing the differences between consecutive snapshots.
async fn watch(connection: &mut Connection, token_file: &Path, interval: Duration) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.green} {msg}")?,
    );

    let mut previous: Vec<DeviceRecord> = Vec::new();

    loop {
        match connection.client.get_devices().await {
            Ok(devices) => {
                let changes = describe_changes(&previous, &devices);
                if changes.is_empty() {
                    debug!("No changes");
                } else {
                    for change in changes {
                        spinner.println(change);
                    }
                }
                previous = devices;
            }
            Err(e) => error!("{}", e),
        }

        if let Err(e) = connection.save(token_file) {
            warn!("Failed to save tokens: {}", e);
        }

        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message(format!("Next poll in {}s", interval.as_secs()));
        tokio::time::sleep(interval).await;
        spinner.disable_steady_tick();
    }
}

fn device_key(index: usize, device: &DeviceRecord) -> String {
    device
        .device_id()
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{}", index))
}

fn attribute_text(value: Option<&Value>) -> String {
    value.map_or_else(|| "-".to_string(), Value::to_string)
}

fn translated_text(code: &str, raw: Option<&Value>) -> (String, String) {
    match raw {
        Some(raw) => {
            let (name, value) = translate(code, raw);
            (name, value.to_string())
        }
        None => {
            let name = descriptor(code).map_or(code, |d| d.name);
            (name.to_string(), "-".to_string())
        }
    }
}

/// Human-readable differences between two device snapshots.
fn describe_changes(previous: &[DeviceRecord], current: &[DeviceRecord]) -> Vec<String> {
    let before: BTreeMap<String, &DeviceRecord> = previous
        .iter()
        .enumerate()
        .map(|(i, d)| (device_key(i, d), d))
        .collect();
    let after: BTreeMap<String, &DeviceRecord> = current
        .iter()
        .enumerate()
        .map(|(i, d)| (device_key(i, d), d))
        .collect();

    let mut changes = Vec::new();

    for (key, device) in &after {
        let label = device_label(device);
        let Some(old) = before.get(key) else {
            changes.push(format!("{}: added", label));
            continue;
        };

        let attrs: BTreeSet<&String> = old
            .0
            .keys()
            .chain(device.0.keys())
            .filter(|attr| *attr != "fields")
            .collect();

        for attr in attrs {
            let old_value = old.0.get(attr);
            let new_value = device.0.get(attr);
            if old_value == new_value {
                continue;
            }
            if REDACT_FIELDS.contains(&attr.as_str()) {
                changes.push(format!("{}: {} changed", label, attr));
            } else {
                changes.push(format!(
                    "{}: {}: {} -> {}",
                    label,
                    attr,
                    attribute_text(old_value),
                    attribute_text(new_value)
                ));
            }
        }

        let empty = serde_json::Map::new();
        let old_fields = old.fields().unwrap_or(&empty);
        let new_fields = device.fields().unwrap_or(&empty);
        let codes: BTreeSet<&String> = old_fields.keys().chain(new_fields.keys()).collect();

        for code in codes {
            let old_raw = old_fields.get(code);
            let new_raw = new_fields.get(code);
            if old_raw == new_raw {
                continue;
            }
            let (name, old_value) = translated_text(code, old_raw);
            let (_, new_value) = translated_text(code, new_raw);
            changes.push(format!("{}: {}: {} -> {}", label, name, old_value, new_value));
        }
    }

    for (key, device) in &before {
        if !after.contains_key(key) {
            changes.push(format!("{}: removed", device_label(device)));
        }
    }

    changes
}

#[cfg(test)]
mod watch_tests {
    use super::*;
    use serde_json::json;

    fn device(value: Value) -> DeviceRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_no_changes() {
        let devices = vec![device(json!({"deviceId": "a", "fields": {"s18": "100"}}))];
        assert!(describe_changes(&devices, &devices).is_empty());
    }

    #[test]
    fn test_field_change_uses_translated_names() {
        let before = vec![device(json!({
            "deviceId": "a",
            "productInfo": {"nickName": "Pool Pump"},
            "fields": {"s18": "100", "s19": "432"}
        }))];
        let after = vec![device(json!({
            "deviceId": "a",
            "productInfo": {"nickName": "Pool Pump"},
            "fields": {"s18": "183", "s19": "432"}
        }))];
        assert_eq!(
            describe_changes(&before, &after),
            vec!["Pool Pump: Current power: 100 -> 183".to_string()]
        );
    }

    #[test]
    fn test_added_and_removed_devices() {
        let before = vec![device(json!({"deviceId": "a", "pname": "Old"}))];
        let after = vec![device(json!({"deviceId": "b", "pname": "New"}))];
        assert_eq!(
            describe_changes(&before, &after),
            vec!["New: added".to_string(), "Old: removed".to_string()]
        );
    }

    #[test]
    fn test_sensitive_attribute_values_are_not_printed() {
        let before = vec![device(json!({"deviceId": "a", "pname": "X", "email": "old@x.y"}))];
        let after = vec![device(json!({"deviceId": "a", "pname": "X", "email": "new@x.y"}))];
        let changes = describe_changes(&before, &after);
        assert_eq!(changes, vec!["X: email changed".to_string()]);
    }

    #[test]
    fn test_attribute_changes_include_added_and_removed_keys() {
        let before = vec![device(json!({"deviceId": "a", "pname": "X", "online": true, "status": "ok"}))];
        let after = vec![device(json!({"deviceId": "a", "pname": "X", "online": false, "mode": 2}))];
        assert_eq!(
            describe_changes(&before, &after),
            vec![
                "X: mode: - -> 2".to_string(),
                "X: online: true -> false".to_string(),
                "X: status: \"ok\" -> -".to_string(),
            ]
        );
    }

    #[test]
    fn test_removed_field_is_reported() {
        let before = vec![device(json!({"deviceId": "a", "pname": "X", "fields": {"s18": "100"}}))];
        let after = vec![device(json!({"deviceId": "a", "pname": "X", "fields": {}}))];
        assert_eq!(
            describe_changes(&before, &after),
            vec!["X: Current power: 100 -> -".to_string()]
        );
    }

    #[test]
    fn test_first_poll_reports_every_device_as_added() {
        let after = vec![
            device(json!({"deviceId": "a", "pname": "Pump"})),
            device(json!({"deviceId": "b", "pname": "Sensor"})),
        ];
        assert_eq!(describe_changes(&[], &after).len(), 2);
    }
}
