use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};

use super::command::ServeArgs;
use super::open_engine;
use crate::config::Config;
use crate::remote::server::{LiveDevice, run_capture_loop, serve};

pub fn cmd_serve(args: &ServeArgs, config: &Config) -> Result<()> {
    let listen = args.listen.unwrap_or(config.server.listen);
    let palette = match args.palette {
        Some(palette) => palette,
        None => config.server.palette()?,
    };
    let cropped = config.server.cropped && !args.uncropped;

    let listener =
        TcpListener::bind(listen).with_context(|| format!("Failed to listen on {listen}"))?;
    log::info!(
        "Listening on {} (palette {palette}, {})",
        listener.local_addr()?,
        if cropped { "cropped" } else { "uncropped" }
    );

    let device = Arc::new(LiveDevice::new(palette, cropped));

    let capture_device = device.clone();
    let capture_config = config.clone();
    let reconnect = config.server.reconnect_interval();
    thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            run_capture_loop(&capture_device, || open_engine(&capture_config), reconnect)
        })?;

    serve(listener, device);
    Ok(())
}
