//! Print what the platform plugins see on this switch.
//!
//! A quick way to check the plugins against real hardware (or a fake
//! sysfs tree via `SONIC_PLATFORM_ROOT`) without running pmon.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use sonic_platform::alibaba::{AlibabaFwMgrUtil, BmcFanUtil};
use sonic_platform::api::{ChassisBase, FanUtil, FwMgrUtil, NOT_AVAILABLE};
use sonic_platform::celestica::Chassis;
use sonic_platform::config::PlatformConfig;
use sonic_platform::platform::Platform;
use sonic_platform::tracing::{self, prelude::*};

/// Report PSU, fan, watchdog and firmware state
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (default: /etc/sonic/platform-plugins.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct PsuReport {
    name: String,
    present: bool,
    status: bool,
    model: String,
    serial: String,
    voltage: f64,
    current: f64,
    power: f64,
    fan_rpm: Option<u32>,
}

#[derive(Serialize)]
struct FanReport {
    name: String,
    present: bool,
    status: bool,
    direction: String,
    speed: u32,
    rpm: u32,
    low_threshold: Option<u32>,
    high_threshold: Option<u32>,
    part_number: Option<String>,
    serial: Option<String>,
}

#[derive(Serialize)]
struct WatchdogReport {
    armed: bool,
    remaining: i32,
    timeout: Option<i32>,
    identity: Option<String>,
}

#[derive(Serialize)]
struct Report {
    platform: String,
    psus: Vec<PsuReport>,
    fans: Vec<FanReport>,
    watchdog: Option<WatchdogReport>,
    versions: Vec<(String, String)>,
}

async fn chassis_report(config: &PlatformConfig, platform: Platform) -> Result<Report> {
    let chassis = Chassis::new(config, platform.clone())
        .await
        .context("failed to build chassis")?;

    let mut psus = Vec::new();
    for psu in (0..chassis.get_num_psus()).filter_map(|i| chassis.get_psu(i)) {
        let fan_rpm = match psu.get_fan(0) {
            Some(fan) => Some(fan.get_speed_rpm().await),
            None => None,
        };
        psus.push(PsuReport {
            name: psu.get_name(),
            present: psu.get_presence().await,
            status: psu.get_status().await,
            model: psu.get_model().await,
            serial: psu.get_serial().await,
            voltage: psu.get_voltage().await,
            current: psu.get_current().await,
            power: psu.get_power().await,
            fan_rpm,
        });
    }

    let mut fans = Vec::new();
    for fan in (0..chassis.get_num_fans()).filter_map(|i| chassis.get_fan(i)) {
        fans.push(FanReport {
            name: fan.get_name(),
            present: fan.get_presence().await,
            status: fan.get_status().await,
            direction: fan.get_direction().await.to_string(),
            speed: fan.get_speed().await,
            rpm: fan.get_speed_rpm().await,
            low_threshold: None,
            high_threshold: None,
            part_number: None,
            serial: None,
        });
    }

    let watchdog = match chassis.get_watchdog() {
        Some(wdt) => Some(WatchdogReport {
            armed: wdt.is_armed().await,
            remaining: wdt.get_remaining_time().await,
            timeout: chassis.watchdog().read_timeout().ok(),
            identity: chassis.watchdog().support().ok().map(|s| s.identity),
        }),
        None => None,
    };

    Ok(Report {
        platform: platform.to_string(),
        psus,
        fans,
        watchdog,
        versions: Vec::new(),
    })
}

async fn bmc_report(config: &PlatformConfig, platform: Platform) -> Result<Report> {
    let fan_util = BmcFanUtil::new(config).context("failed to create BMC client")?;
    let mut fans = Vec::new();
    for index in 1..=fan_util.get_num_fans() {
        let rpm = fan_util.get_fan_speed(index).await;
        fans.push(FanReport {
            name: sonic_platform::alibaba::fan_util::sensor_key(index),
            present: rpm > 0,
            status: rpm > 0,
            direction: NOT_AVAILABLE.to_string(),
            speed: 0,
            rpm,
            low_threshold: fan_util.get_fan_low_threshold(index).await,
            high_threshold: Some(fan_util.get_fan_high_threshold(index).await),
            part_number: Some(fan_util.get_fan_pn(index).await),
            serial: Some(fan_util.get_fan_sn(index).await),
        });
    }

    let fw = AlibabaFwMgrUtil::new(config).context("failed to create BMC client")?;
    let versions = vec![
        ("BMC".to_string(), fw.get_bmc_version().await),
        ("BIOS".to_string(), fw.get_bios_version().await),
        ("ONIE".to_string(), fw.get_onie_version().await),
        ("CPLD".to_string(), fw.get_cpld_version().await),
        ("PCIe".to_string(), fw.get_pcie_version().await),
        ("FPGA".to_string(), fw.get_fpga_version().await),
    ];

    Ok(Report {
        platform: platform.to_string(),
        psus: Vec::new(),
        fans,
        watchdog: None,
        versions,
    })
}

fn print_text(report: &Report) {
    println!("Platform: {}", report.platform);
    for psu in &report.psus {
        println!(
            "{:8} present={} status={} model={} serial={} {:.2}V {:.2}A {:.2}W{}",
            psu.name,
            psu.present,
            psu.status,
            psu.model,
            psu.serial,
            psu.voltage,
            psu.current,
            psu.power,
            psu.fan_rpm.map(|rpm| format!(" fan={}rpm", rpm)).unwrap_or_default()
        );
    }
    for fan in &report.fans {
        println!(
            "{:12} present={} status={} direction={} speed={}% ({} rpm)",
            fan.name, fan.present, fan.status, fan.direction, fan.speed, fan.rpm
        );
    }
    if let Some(wdt) = &report.watchdog {
        println!(
            "Watchdog: armed={} remaining={}s{}{}",
            wdt.armed,
            wdt.remaining,
            wdt.timeout.map(|t| format!(" timeout={}s", t)).unwrap_or_default(),
            wdt.identity.as_deref().map(|id| format!(" ({})", id)).unwrap_or_default()
        );
    }
    for (component, version) in &report.versions {
        println!("{:5} {}", component, version);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.verbose {
        tracing::init_verbose();
    } else {
        tracing::init_journald_or_stdout();
    }

    let config = match &args.config {
        Some(path) => {
            let mut config = PlatformConfig::load_from(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            config.apply_env();
            config
        }
        None => PlatformConfig::load().context("failed to load configuration")?,
    };
    let platform = Platform::detect(&config)
        .await
        .context("failed to identify platform")?;
    debug!(%platform, "Detected platform");

    let report = match platform {
        Platform::As1332h | Platform::As23128h => bmc_report(&config, platform).await?,
        other => chassis_report(&config, other).await?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }
    Ok(())
}
