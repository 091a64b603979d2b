use clap::Parser;
use ducominer_g_opencl_core::list_gpu_devices;
use ducominer_rs::error::{RecoveryStrategy, EXIT_DEVICE_PROVISIONING};
use ducominer_rs::logging::{init_logging, LogConfig};
use ducominer_rs::{Args, MinerConfig, MiningManager, MiningError};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.list_devices {
        list_devices();
        return;
    }

    let config = match MinerConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // guard 存活期间文件日志才会落盘
    let _log_guard = match init_logging(LogConfig::from(&config.logging)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Starting {} v{}", ducominer_rs::NAME, ducominer_rs::VERSION);
    info!("Configuration: {}", args.config);

    let manager = MiningManager::new(config);
    if let Err(e) = manager.start().await {
        exit_on(&e);
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Error waiting for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
            manager.stop().await;
        }
        fatal = manager.wait_fatal() => {
            manager.stop().await;
            if let Some(e) = fatal {
                exit_on(&e);
            }
        }
    }
}

fn list_devices() {
    match list_gpu_devices() {
        Ok(devices) if devices.is_empty() => println!("No OpenCL GPU devices found"),
        Ok(devices) => {
            for (index, device) in devices.iter().enumerate() {
                println!("[{}] {}", index, device);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", e.remediation());
            std::process::exit(EXIT_DEVICE_PROVISIONING);
        }
    }
}

fn exit_on(e: &MiningError) -> ! {
    error!("Mining failed: {}", e);
    if let Some(hint) = e.remediation() {
        warn!("{}", hint);
    }
    let code = match e.recovery_strategy() {
        RecoveryStrategy::Exit { code } => code,
        _ => 1,
    };
    std::process::exit(code);
}
