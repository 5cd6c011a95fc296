//! Kiln host binary: wires the interpreter to stdin (serial), a TCP
//! console (web source) and the simulated planner and heaters, then
//! drives the whole machine from a single spin loop.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use kiln_rs::config;
use kiln_rs::gcode::GCodes;
use kiln_rs::heat::SimHeat;
use kiln_rs::motion::SimPlanner;
use kiln_rs::platform::{MonotonicClock, Platform};
use kiln_rs::storage::MassStorage;
use kiln_rs::transport::ChannelTransport;

#[derive(Parser)]
#[command(name = "kiln", about = "G-code interpreter and motion coordinator")]
struct Args {
    /// Path to the machine configuration file.
    #[arg(short, long, default_value = "kiln.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let config = match config::load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("cannot load {} ({}), using defaults", args.config, e);
            config::Config::default()
        }
    };

    tracing::info!("starting {}", config.machine.name);

    let storage = MassStorage::new(config.storage.root.clone())?;
    let platform = Platform::new(&config, Box::new(MonotonicClock::new()));

    // Serial source: stdin in, stdout out.
    let (serial_byte_tx, serial_byte_rx) = mpsc::channel::<u8>();
    let (serial_reply_tx, serial_reply_rx) = mpsc::channel::<String>();
    let serial = ChannelTransport::new(serial_byte_rx, Some(serial_reply_tx));

    // Web source: a TCP line console.
    let (web_byte_tx, web_byte_rx) = mpsc::channel::<u8>();
    let (web_reply_tx, web_reply_rx) = mpsc::channel::<String>();
    let web = ChannelTransport::new(web_byte_rx, Some(web_reply_tx));

    let mut gcodes = GCodes::new(platform, storage, Box::new(web), Box::new(serial));
    let mut planner = SimPlanner::new(&config);
    let mut heat = SimHeat::new();

    // stdin reader.
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 256];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    for &b in &buf[..n] {
                        if serial_byte_tx.send(b).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });

    // stdout writer for serial replies.
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        let stdout = std::io::stdout();
        for reply in serial_reply_rx {
            let mut lock = stdout.lock();
            let _ = lock.write_all(reply.as_bytes());
            let _ = lock.flush();
        }
    });

    // TCP console for the web source. The latest client gets the replies.
    let client: Arc<Mutex<Option<tokio::net::tcp::OwnedWriteHalf>>> = Arc::new(Mutex::new(None));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.console.port)).await?;
    tracing::info!("console listening on port {}", config.console.port);

    {
        let client = client.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, peer)) = listener.accept().await else {
                    break;
                };
                tracing::info!("console client connected: {}", peer);
                let (mut read_half, write_half) = socket.into_split();
                if let Ok(mut slot) = client.lock() {
                    *slot = Some(write_half);
                }
                let byte_tx = web_byte_tx.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 256];
                    loop {
                        match read_half.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                for &b in &buf[..n] {
                                    if byte_tx.send(b).is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                });
            }
        });
    }

    // Reply pump: web replies go to the connected console client.
    {
        let client = client.clone();
        tokio::spawn(async move {
            loop {
                let text = match web_reply_rx.try_recv() {
                    Ok(text) => text,
                    Err(mpsc::TryRecvError::Empty) => {
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        continue;
                    }
                    Err(mpsc::TryRecvError::Disconnected) => break,
                };
                let writer = match client.lock() {
                    Ok(mut slot) => slot.take(),
                    Err(_) => None,
                };
                if let Some(mut w) = writer {
                    if w.write_all(text.as_bytes()).await.is_ok() {
                        if let Ok(mut slot) = client.lock() {
                            *slot = Some(w);
                        }
                    }
                }
            }
        });
    }

    // The machine loop: one interpreter step, one planner tick, one
    // thermal step per iteration.
    let mut interval = tokio::time::interval(std::time::Duration::from_micros(500));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        gcodes.spin(&mut planner, &mut heat);
        if let Some(record) = gcodes.read_move() {
            planner.begin_move(record);
        }
        planner.tick();
        heat.spin();
        if gcodes.platform.reset_requested() {
            tracing::warn!("restart requested, shutting down");
            break;
        }
    }

    Ok(())
}
