//! `wrp-hub` - local WRP relay between the cloud and attached services.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wrp_relay::config::HubConfig;
use wrp_relay::hub::{ChannelUpstream, Hub};

/// Local WRP relay between the cloud and attached services.
#[derive(Debug, Parser)]
#[command(name = "wrp-hub", version, about, disable_version_flag = true)]
struct Args {
    /// print version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    #[allow(dead_code)]
    version: Option<bool>,

    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// the hardware model name
    #[arg(short = 'm', long = "hw-model")]
    hw_model: Option<String>,

    /// the serial number
    #[arg(short = 's', long = "hw-serial-number")]
    hw_serial_number: Option<String>,

    /// the device manufacturer
    #[arg(short = 'f', long = "hw-manufacturer")]
    hw_manufacturer: Option<String>,

    /// the MAC address used to manage the device
    #[arg(short = 'd', long = "hw-mac")]
    hw_mac: Option<String>,

    /// the last known reboot reason
    #[arg(short = 'r', long = "hw-last-reboot-reason")]
    hw_last_reboot_reason: Option<String>,

    /// firmware name and version currently running
    #[arg(short = 'n', long = "fw-name")]
    fw_name: Option<String>,

    /// the boot time in unix time
    #[arg(short = 'b', long = "boot-time")]
    boot_time: Option<i64>,

    /// the cloud url
    #[arg(short = 'u', long = "xmidt-url")]
    xmidt_url: Option<String>,

    /// the maximum value in seconds for the backoff algorithm
    #[arg(short = 'o', long = "xmidt-backoff-max")]
    xmidt_backoff_max: Option<u64>,

    /// the maximum time to wait between pings before assuming the upstream is broken
    #[arg(short = 't', long = "xmidt-ping-timeout")]
    xmidt_ping_timeout: Option<u64>,

    /// the device interface being used to connect to the cloud
    #[arg(short = 'i', long = "xmidt-interface-used")]
    xmidt_interface_used: Option<String>,

    /// local url services push to
    #[arg(short = 'l', long = "parodus-local-url")]
    parodus_local_url: Option<String>,

    /// partner ID of iot/gateway device
    #[arg(short = 'p', long = "partner-id")]
    partner_id: Option<String>,

    /// certs for establishing a secure upstream
    #[arg(short = 'c', long = "ssl-cert-path")]
    ssl_cert_path: Option<String>,

    /// force connecting to an ipv4 address
    #[arg(short = '4', long = "force-ipv4")]
    force_ipv4: bool,

    /// force connecting to an ipv6 address
    #[arg(short = '6', long = "force-ipv6")]
    force_ipv6: bool,

    /// evict services silent for this many seconds (0 never evicts)
    #[arg(long = "service-ttl")]
    service_ttl_secs: Option<u64>,

    /// enables debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    /// Overlay the flags that were given onto `config`.
    fn apply(self, config: &mut HubConfig) {
        if let Some(v) = self.hw_model {
            config.hw_model = v;
        }
        if let Some(v) = self.hw_serial_number {
            config.hw_serial_number = v;
        }
        if let Some(v) = self.hw_manufacturer {
            config.hw_manufacturer = v;
        }
        if let Some(v) = self.hw_mac {
            config.hw_mac = v;
        }
        if let Some(v) = self.hw_last_reboot_reason {
            config.hw_last_reboot_reason = v;
        }
        if let Some(v) = self.fw_name {
            config.fw_name = v;
        }
        if let Some(v) = self.boot_time {
            config.boot_time = v;
        }
        if let Some(v) = self.xmidt_url {
            config.xmidt_url = v;
        }
        if let Some(v) = self.xmidt_backoff_max {
            config.xmidt_backoff_max = v;
        }
        if let Some(v) = self.xmidt_ping_timeout {
            config.xmidt_ping_timeout = v;
        }
        if let Some(v) = self.xmidt_interface_used {
            config.xmidt_interface_used = v;
        }
        if let Some(v) = self.parodus_local_url {
            config.parodus_local_url = v;
        }
        if let Some(v) = self.partner_id {
            config.partner_id = v;
        }
        if let Some(v) = self.ssl_cert_path {
            config.ssl_cert_path = v;
        }
        if let Some(v) = self.service_ttl_secs {
            config.service_ttl_secs = v;
        }

        config.force_ipv4 |= self.force_ipv4;
        config.force_ipv6 |= self.force_ipv6;
        config.debug |= self.debug;
        config.normalize();
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = Args::parse();

    let mut config = match args.config.take() {
        Some(path) => match HubConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::from(2);
            }
        },
        None => HubConfig::default(),
    };
    args.apply(&mut config);

    init_tracing(config.debug);

    if let Err(e) = config.validate() {
        eprintln!("{e}");
        return ExitCode::from(2);
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("hub failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: HubConfig) -> wrp_relay::Result<()> {
    tracing::info!(
        device_id = %config.device_id(),
        upstream = %config.upstream_url(),
        local_url = %config.parodus_local_url,
        "starting hub"
    );

    // The cloud transport is not part of this binary; cloud-bound traffic is
    // logged.
    let (upstream, mut to_cloud) = ChannelUpstream::new(config.queue_capacity);
    let hub = Hub::start(config.relay(), Arc::new(upstream)).await?;

    let drain = tokio::spawn(async move {
        while let Some(msg) = to_cloud.recv().await {
            tracing::info!(
                msg_type = %msg.msg_type,
                source = %msg.source,
                destination = %msg.destination,
                transaction_uuid = %msg.transaction_uuid,
                "upstream message"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    hub.shutdown().await?;
    let _ = drain.await;
    Ok(())
}
