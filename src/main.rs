#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::time::{Duration, Instant};

use stm32_uart_bootloader::linux::{pump, LinuxBootloader};
use stm32_uart_bootloader::{BootDecision, Layout, Options, RxMailbox};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to serve the bootloader on
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "57600")]
    baud: usize,

    /// Flash image file standing in for the application region
    #[structopt(long, default_value = "flash.bin")]
    image: String,

    /// Size of the application region (eg. 184KiB), defaults to the STM32L0 layout
    #[structopt(long, parse(try_from_str = parse_size))]
    image_size: Option<u64>,

    /// Initial BootTag value in hex, AABBCCDD keeps the bootloader resident
    #[structopt(long, default_value = "AABBCCDD", parse(try_from_str = parse_tag))]
    boot_tag: u32,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "debug")]
    log_level: LevelFilter,
}

fn parse_size(s: &str) -> Result<u64, String> {
    bytefmt::parse(s).map_err(|e| e.to_string())
}

fn parse_tag(s: &str) -> Result<u32, String> {
    let s = s.trim_start_matches("0x");
    let mut b = [0u8; 4];
    hex::decode_to_slice(s, &mut b).map_err(|e| e.to_string())?;
    Ok(u32::from_be_bytes(b))
}

static LINK: RxMailbox = RxMailbox::new();

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    let mut layout = Layout::STM32L0;
    if let Some(size) = o.image_size {
        if size < layout.page_size as u64 || size > (u32::MAX - layout.app_start) as u64 {
            error!("Invalid image size {}", size);
            return;
        }
        layout.app_end = layout.app_start + size as u32 - 1;
    }

    info!(
        "Application region 0x{:08x}..=0x{:08x}, marker at 0x{:08x}",
        layout.app_start,
        layout.app_end,
        layout.marker_address()
    );

    let mut b = match LinuxBootloader::linux(
        &LINK,
        &o.port,
        o.baud,
        &o.image,
        layout,
        o.boot_tag,
        o.options.clone(),
    ) {
        Ok(b) => b,
        Err(e) => {
            error!("Error opening bootloader: {:?}", e);
            return;
        }
    };

    match b.start() {
        BootDecision::Launch => return,
        d => info!("Staying resident ({:?})", d),
    }

    info!("Bootloader listening on {}", o.port);

    let mut last_tick = Instant::now();
    loop {
        if let Err(e) = pump(b.serial(), &LINK) {
            error!("Serial read error: {:?}", e);
            return;
        }

        // Stand in for the 1 ms timer interrupt
        let elapsed = last_tick.elapsed().as_millis() as u64;
        for _ in 0..elapsed {
            LINK.tick();
        }
        last_tick += Duration::from_millis(elapsed);

        if let Err(e) = b.poll() {
            error!("Bootloader error: {:?}", e);
            return;
        }
    }
}
