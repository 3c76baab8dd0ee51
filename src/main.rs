use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Result};
use log::info;

use zed80::loader;
use zed80::machine::{self, SystemKind};
use zed80::memory::Memory;

struct Args {
    file: PathBuf,
    system: Option<SystemKind>,
    port: Option<u8>,
    help: bool,
}

fn usage(program: &str) {
    eprintln!("Usage: {} [options] <file>", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --system cpm|basic   Force system type");
    eprintln!("  --port <hex>         Override serial port base (e.g. 0x80)");
    eprintln!("  -h, --help           Show this help");
    eprintln!();
    eprintln!("Auto-detection:");
    eprintln!("  .com/.cim -> CP/M, everything else -> BASIC SBC");
    eprintln!("  Intel HEX files loaded by format, binary files at 0x0000");
}

fn parse_args() -> Result<Args> {
    let mut file = None;
    let mut system = None;
    let mut port = None;
    let mut help = false;
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--system" => {
                let value = iter.next().ok_or_else(|| anyhow!("--system needs a value"))?;
                system = Some(match value.as_str() {
                    "cpm" => SystemKind::Cpm,
                    "basic" => SystemKind::Basic,
                    other => bail!("unknown system: {}", other),
                });
            }
            "--port" => {
                let value = iter.next().ok_or_else(|| anyhow!("--port needs a value"))?;
                let digits = value.trim_start_matches("0x").trim_start_matches("0X");
                let p = u8::from_str_radix(digits, 16)
                    .map_err(|_| anyhow!("bad port: {}", value))?;
                port = Some(p);
            }
            "-h" | "--help" => help = true,
            other if other.starts_with('-') => bail!("unknown option: {}", other),
            other => file = Some(PathBuf::from(other)),
        }
    }
    if help {
        // The file argument is optional when only help was asked for.
        return Ok(Args {
            file: PathBuf::new(),
            system,
            port,
            help,
        });
    }
    let file = file.ok_or_else(|| anyhow!("missing file argument"))?;
    Ok(Args {
        file,
        system,
        port,
        help,
    })
}

fn run(args: Args) -> Result<()> {
    let mut mem = Memory::new();

    let (loaded, system) = if loader::is_hex_file(&args.file) {
        let n = loader::load_hex(&args.file, &mut mem)?;
        info!("loaded {} bytes from HEX file", n);
        let system = args
            .system
            .unwrap_or_else(|| machine::detect_system(&args.file));
        (n, system)
    } else {
        let system = args
            .system
            .unwrap_or_else(|| machine::detect_system(&args.file));
        let load_addr = match system {
            SystemKind::Cpm => 0x0100,
            SystemKind::Basic => 0x0000,
        };
        let n = loader::load_binary(&args.file, &mut mem, load_addr)?;
        info!("loaded {} bytes at {:#06x}", n, load_addr);
        (n, system)
    };

    match system {
        SystemKind::Basic => {
            let base = args
                .port
                .unwrap_or_else(|| machine::detect_serial_port(mem.slice(0, loaded.min(0xffff) as u16)));
            // The ROM lives in the low 8 KiB; lock it before the guest runs.
            mem.set_rom_top(0x2000);
            eprintln!(
                "BASIC SBC mode, serial port base: {:#04x} (Ctrl+] to exit)",
                base
            );
            machine::run_basic(mem, base);
        }
        SystemKind::Cpm => {
            eprintln!("CP/M mode");
            machine::run_cpm(mem);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let program = env::args().next().unwrap_or_else(|| "zed80".into());
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            usage(&program);
            return ExitCode::from(1);
        }
    };
    if args.help {
        usage(&program);
        return ExitCode::SUCCESS;
    }
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::from(1)
        }
    }
}
