use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use hidl_passthrough::protocol::ERROR_FAILED;
use hidl_passthrough::{
    AudioDevice, Core, HwModule, HwModuleRegistry, IoEventFlags, LocalProtocol, MainLoop,
    MethodCall, ModuleConfig, ModuleInfo, PassthroughModule, PollMainLoop, Reply,
};

const EINVAL: i32 = -22;

struct Options {
    module_args: Option<String>,
    address: Option<String>,
    helper_binary: Option<PathBuf>,
    info: bool,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: hidl-passthroughd [options] [module arguments...]");
            eprintln!();
            eprintln!("Module arguments:");
            eprintln!("  {}", hidl_passthrough::MODULE_USAGE);
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --address <addr>        Control protocol address handed to the helper");
            eprintln!("  --helper-binary <path>  Helper binary [default: built-in location]");
            eprintln!("  --info                  Print module information and exit");
            process::exit(2);
        }
    };

    hidl_passthrough::init_tracing();

    if let Err(e) = run(options) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut module_args: Vec<&str> = Vec::new();
    let mut address = None;
    let mut helper_binary = None;
    let mut info = false;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--address" => {
                i += 1;
                address = Some(args.get(i).ok_or("--address requires a value")?.clone());
            }
            "--helper-binary" => {
                i += 1;
                helper_binary = Some(PathBuf::from(
                    args.get(i).ok_or("--helper-binary requires a value")?,
                ));
            }
            "--info" => info = true,
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => module_args.push(arg),
        }
        i += 1;
    }

    Ok(Options {
        module_args: (!module_args.is_empty()).then(|| module_args.join(" ")),
        address,
        helper_binary,
        info,
    })
}

/// In-memory device: remembers every key it was given.
#[derive(Debug, Default)]
struct LoopbackDevice {
    values: BTreeMap<String, String>,
}

impl AudioDevice for LoopbackDevice {
    fn get_parameters(&mut self, keys: &str) -> Option<String> {
        let found: Vec<String> = keys
            .split(';')
            .filter_map(|key| self.values.get(key).map(|v| format!("{key}={v}")))
            .collect();
        (!found.is_empty()).then(|| found.join(";"))
    }

    fn set_parameters(&mut self, key_value_pairs: &str) -> i32 {
        let mut pairs = Vec::new();
        for pair in key_value_pairs.split(';').filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return EINVAL;
            };
            pairs.push((key.to_string(), value.to_string()));
        }
        self.values.extend(pairs);
        0
    }
}

fn run(options: Options) -> anyhow::Result<()> {
    if options.info {
        println!("{}", serde_json::to_string_pretty(&ModuleInfo::new())?);
        return Ok(());
    }

    let mainloop = Arc::new(PollMainLoop::new());
    let protocol = Arc::new(match options.address {
        Some(address) => LocalProtocol::new(address),
        None => LocalProtocol::without_address(),
    });
    let hw_modules = HwModuleRegistry::new();
    hw_modules.register(HwModule::new("primary", LoopbackDevice::default()));

    let core = Core {
        mainloop: mainloop.clone(),
        protocol: protocol.clone(),
        hw_modules,
    };

    let mut config = ModuleConfig::from_args(options.module_args.as_deref())
        .context("Failed to parse module arguments")?;
    if let Some(binary) = options.helper_binary {
        config = config.with_helper_binary(binary);
    }
    let mut module = PassthroughModule::start_with_config(&core, config)
        .context("Failed to load module")?;

    // Private copy so reads bypass the buffered std handle.
    let mut input = std::fs::File::from(
        std::io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .context("Failed to duplicate stdin")?,
    );
    let stdin_event = mainloop.io_new(input.as_raw_fd(), IoEventFlags::INPUT);

    let mut pending = Vec::new();
    let mut stdout = std::io::stdout().lock();
    tracing::info!("Serving method calls from stdin");

    'serve: loop {
        for (id, events) in mainloop.poll(None).context("poll failed")? {
            if id != stdin_event {
                module.dispatch_io(id, events);
                continue;
            }

            let mut chunk = [0u8; 4096];
            let n = match input.read(&mut chunk) {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                other => other.context("Failed to read stdin")?,
            };
            if n == 0 {
                break 'serve;
            }
            pending.extend_from_slice(&chunk[..n]);

            while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=end).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let reply = handle_line(&protocol, line);
                writeln!(stdout, "{}", serde_json::to_string(&reply)?)?;
                stdout.flush()?;
            }
        }
    }

    tracing::info!("stdin closed, unloading");
    mainloop.io_free(stdin_event);
    module.stop();
    Ok(())
}

fn handle_line(protocol: &LocalProtocol, line: &str) -> Reply {
    match serde_json::from_str::<MethodCall>(line) {
        Ok(call) => {
            tracing::debug!(member = %call.member, "Method call");
            protocol.call(&call)
        }
        Err(e) => Reply::error(ERROR_FAILED, format!("Invalid method call: {e}")),
    }
}
