use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use jogkit::{AppConfig, ConsoleListener, DeviceController, LinkParams, SerialLink};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Stream motion commands to a firmware motor driver board
#[derive(Parser)]
#[command(name = "jogkit", version, about)]
struct Cli {
    /// Serial port to connect to at startup (e.g. /dev/ttyUSB0, COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// List candidate ports and exit
    #[arg(long)]
    list_ports: bool,
}

/// Console listener that mirrors link traffic to stdout
struct StdoutConsole;

#[async_trait]
impl ConsoleListener for StdoutConsole {
    async fn on_line_sent(&self, command: &str) {
        println!(">> {}", command);
    }

    async fn on_line_received(&self, line: &str) {
        println!("<< {}", line);
    }

    async fn on_fault(&self, message: &str) {
        println!("!! {}", message);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jogkit::init_logging()?;

    let cli = Cli::parse();
    if cli.list_ports {
        return print_ports();
    }

    println!(
        "jogkit {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_DATE")
    );

    let config = AppConfig::load();
    let controller = Arc::new(DeviceController::new(config.pacer.clone()));
    let _console = controller.register_listener(Arc::new(StdoutConsole));

    if let Some(port) = &cli.port {
        connect(&controller, port, config.connection.baud_rate).await;
    }

    repl(controller, config).await
}

fn print_ports() -> anyhow::Result<()> {
    let ports = jogkit::list_ports().context("port enumeration failed")?;
    if ports.is_empty() {
        println!("No candidate ports found");
        return Ok(());
    }
    for port in ports {
        println!("{}  {}", port.port_name, port.description);
    }
    Ok(())
}

async fn connect(controller: &DeviceController, port: &str, baud_rate: u32) {
    let params = LinkParams {
        port: port.to_string(),
        baud_rate,
    };
    match controller.connect(&params).await {
        Ok(()) => println!("Connected to {}", port),
        Err(e) => println!("!! connect failed: {}", e),
    }
}

/// Pick the port to connect to: explicit argument, else the configured
/// default, else the first enumerated candidate.
fn resolve_port(arg: Option<&str>, config: &AppConfig) -> Option<String> {
    if let Some(port) = arg {
        return Some(port.to_string());
    }
    if config.connection.port != "Auto" && !config.connection.port.is_empty() {
        return Some(config.connection.port.clone());
    }
    jogkit::list_ports()
        .ok()
        .and_then(|ports| ports.first().map(|p| p.port_name.clone()))
}

async fn repl(controller: Arc<DeviceController>, config: AppConfig) -> anyhow::Result<()> {
    println!("Type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (line, ""),
        };

        match cmd {
            "" => {}
            "help" => print_help(),
            "ports" => {
                if let Err(e) = print_ports() {
                    println!("!! {}", e);
                }
            }
            "connect" => {
                match resolve_port((!rest.is_empty()).then_some(rest), &config) {
                    Some(port) => connect(&controller, &port, config.connection.baud_rate).await,
                    None => println!("!! no port given and none found"),
                }
            }
            "disconnect" => {
                controller.disconnect().await;
                println!("Disconnected");
            }
            "send" => {
                if rest.is_empty() {
                    println!("usage: send <command>");
                } else if let Err(e) = controller.send(rest).await {
                    println!("!! {}", e);
                }
            }
            "query" => {
                if rest.is_empty() {
                    println!("usage: query <command>");
                } else {
                    match controller
                        .send_and_await(rest, Duration::from_millis(1500))
                        .await
                    {
                        Ok(reply) => println!("reply: {}", reply),
                        Err(e) => println!("!! {}", e),
                    }
                }
            }
            "wait" => {
                let ms: u64 = rest.parse().unwrap_or(1000);
                match controller.wait_for_line(Duration::from_millis(ms)).await {
                    Some(reply) => println!("reply: {}", reply),
                    None => println!("(no line within {}ms)", ms),
                }
            }
            "start" => match controller.start_pacer().await {
                Ok(()) => println!("Pacing at {} mm/min", controller.feed_rate()),
                Err(e) => println!("!! {}", e),
            },
            "stop" => {
                controller.stop_pacer().await;
                println!("Pacer stopped");
            }
            "feed" => match rest {
                "+" => println!("Feed {} mm/min", controller.adjust_feed(1)),
                "-" => println!("Feed {} mm/min", controller.adjust_feed(-1)),
                "" => println!("Feed {} mm/min", controller.feed_rate()),
                _ => println!("usage: feed [+|-]"),
            },
            "probe" => {
                let port = (!rest.is_empty()).then_some(rest).map(str::to_string);
                match port.or_else(|| resolve_port(None, &config)) {
                    Some(port) => probe_terminators(&controller, &port, config.connection.baud_rate).await,
                    None => println!("!! no port given and none found"),
                }
            }
            "quit" | "exit" => break,
            other => println!("unknown command '{}', try 'help'", other),
        }
    }

    controller.disconnect().await;
    Ok(())
}

fn print_help() {
    println!("  ports              list candidate serial ports");
    println!("  connect [port]     open the link (default from config or enumeration)");
    println!("  disconnect         close the link");
    println!("  send <command>     write one command line");
    println!("  query <command>    write a command and wait for the next reply line");
    println!("  wait [ms]          wait for the next inbound line");
    println!("  start / stop       run or stop the jog pacer");
    println!("  feed [+|-]         show or step the feed rate");
    println!("  probe [port]       try alternate line terminators (disconnected only)");
    println!("  quit               disconnect and exit");
}

/// One-off diagnostic: fire a firmware-info request with each terminator
/// style and dump whatever raw bytes come back. Uses its own short-lived
/// link so it never races the reader loop.
async fn probe_terminators(controller: &DeviceController, port: &str, baud_rate: u32) {
    if controller.is_connected() {
        println!("!! probe needs the link disconnected");
        return;
    }

    let params = LinkParams {
        port: port.to_string(),
        baud_rate,
    };
    let link = match SerialLink::open(&params).await {
        Ok(link) => link,
        Err(e) => {
            println!("!! probe open failed: {}", e);
            return;
        }
    };

    for (name, terminator) in [("LF", "\n"), ("CR", "\r"), ("CRLF", "\r\n")] {
        let request = format!("M115{}", terminator);
        if let Err(e) = link.write_raw(request.as_bytes()) {
            println!("!! probe {}: write failed: {}", name, e);
            continue;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut buf = [0u8; 1024];
        match link.read_available(&mut buf) {
            Ok(0) => println!("probe {}: no response", name),
            Ok(n) => println!(
                "probe {}: {} bytes: {:?}",
                name,
                n,
                String::from_utf8_lossy(&buf[..n])
            ),
            Err(e) => println!("!! probe {}: read failed: {}", name, e),
        }
    }

    link.close();
}
