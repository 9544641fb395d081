//! Entry point for `tcp-udp-tool`.
//!
//! Parses CLI arguments and runs one of the interactive modes.  Each line
//! typed on stdin is parsed with the selected parser and sent; everything
//! sent or received is printed with the selected formatter.  `/quit` leaves
//! any mode, `/disconnect` drops the current client in server mode and
//! `/ipv6 on|off` toggles IPv6 addresses in interfaces mode.

use anyhow::{anyhow, Result};
use clap::{Parser as _, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use tcp_udp_tool::config::DEFAULT_TCP_BUFFER_SIZE;
use tcp_udp_tool::formatter::{FormatterKind, DEFAULT_BYTES_PER_ROW};
use tcp_udp_tool::history::{self, History, DEFAULT_CAPACITY};
use tcp_udp_tool::interfaces::{BindChoice, BindChoiceWatch, ErrorSink, RouteProbe};
use tcp_udp_tool::net::validate_port;
use tcp_udp_tool::parser::{Parser, ParserKind};
use tcp_udp_tool::{
    ClientStatus, Formatter, Piece, ServerStatus, Settings, TcpClient, TcpClientEvent, TcpServer,
    TcpServerEvent, TransportConfig, UdpClientServer, UdpEvent, UdpStatus,
};

/// Send and receive raw bytes over TCP and UDP.
#[derive(clap::Parser)]
#[command(author, version, about)]
struct Cli {
    /// How sent and received data is displayed.
    #[arg(short, long, value_enum, default_value_t)]
    format: FormatterKind,

    /// How typed lines are turned into bytes.
    #[arg(long, value_enum, default_value_t)]
    parser: ParserKind,

    /// Bytes per row in hex display.
    #[arg(long, default_value_t = DEFAULT_BYTES_PER_ROW)]
    hex_width: usize,

    /// TCP receive buffer size in bytes.
    #[arg(long, default_value_t = DEFAULT_TCP_BUFFER_SIZE)]
    buffer_size: usize,

    /// Offer IPv6 addresses in the interface list.
    #[arg(long, env = "TCP_UDP_TOOL_IPV6")]
    ipv6: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Connect to a TCP server.
    Client {
        /// Remote host name or address.
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Remote port.
        #[arg(short, long, value_parser = remote_port)]
        port: u16,
    },
    /// Accept one TCP client at a time.
    Server {
        /// Local address to bind (`any`, `any6` or a literal address).
        #[arg(short, long, default_value = "any")]
        bind: String,
        /// Local port (0 picks a free one).
        #[arg(short, long, default_value_t = 0, value_parser = local_port)]
        port: u16,
    },
    /// Send and receive UDP datagrams.
    Udp {
        /// Local address to receive on; omit to only send.
        #[arg(short, long)]
        bind: Option<String>,
        /// Local port to receive on.
        #[arg(short, long, default_value_t = 0, value_parser = local_port)]
        port: u16,
        /// Destination for typed lines, as host:port.
        #[arg(short, long, value_parser = destination)]
        to: Option<(String, u16)>,
    },
    /// List the local addresses that can be bound.
    Interfaces {
        /// Print the list once and exit.
        #[arg(long)]
        once: bool,
    },
}

fn parse_port(s: &str, allow_zero: bool) -> Result<u16, String> {
    let value: i64 = s.trim().parse().map_err(|_| format!("'{s}' is not a number"))?;
    validate_port(value, allow_zero).map_err(|e| e.to_string())
}

fn local_port(s: &str) -> Result<u16, String> {
    parse_port(s, true)
}

fn remote_port(s: &str) -> Result<u16, String> {
    parse_port(s, false)
}

fn destination(s: &str) -> Result<(String, u16), String> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("'{s}' is not host:port"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(format!("'{s}' has no host"));
    }
    Ok((host.to_string(), remote_port(port)?))
}

/// Prints reported errors on stderr.
struct StderrSink;

impl ErrorSink for StderrSink {
    fn report(&self, message: &str) {
        log::debug!("reported: {message}");
        eprintln!("error: {message}");
    }
}

/// Parsing of typed lines and printing of pieces, shared by all modes.
struct Console {
    parser: Box<dyn Parser>,
    printer: Box<dyn Formatter>,
    history: History,
    sink: StderrSink,
}

impl Console {
    fn new(cli: &Cli) -> Self {
        Self {
            parser: cli.parser.build(),
            printer: cli.format.build(cli.hex_width),
            history: History::new(cli.format.build(cli.hex_width), DEFAULT_CAPACITY),
            sink: StderrSink,
        }
    }

    /// Bytes for a typed line, or `None` after reporting why it was rejected.
    fn compose(&self, line: &str) -> Option<Piece> {
        match self.parser.parse(line) {
            Ok(bytes) => Some(Piece::sent(bytes)),
            Err(e) => {
                self.sink.report(&e.to_string());
                None
            }
        }
    }

    fn show(&mut self, piece: Piece) {
        let mut out = String::new();
        self.printer.format(&piece, &mut out);
        print!("{out}");
        self.history.append(piece);
    }

    fn set_header(&mut self, header: String) {
        println!("== {header}");
        self.history.set_header(header);
    }

    fn report(&self, message: &str) {
        self.sink.report(message);
    }

    fn finish(&self) {
        log::info!(
            "{} piece(s): {} byte(s) sent, {} byte(s) received",
            self.history.len(),
            self.history.bytes_sent(),
            self.history.bytes_received()
        );
    }
}

type Lines = tokio::io::Lines<BufReader<tokio::io::Stdin>>;

fn stdin_lines() -> Lines {
    BufReader::new(tokio::io::stdin()).lines()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = TransportConfig::default().with_tcp_buffer_size(cli.buffer_size);
    let settings = Settings::new(cli.ipv6);
    let mut console = Console::new(&cli);

    match &cli.mode {
        Mode::Client { host, port } => run_client(&mut console, config, host, *port).await?,
        Mode::Server { bind, port } => run_server(&mut console, config, bind, *port).await?,
        Mode::Udp { bind, port, to } => {
            run_udp(&mut console, config, bind.as_deref(), *port, to.clone()).await?
        }
        Mode::Interfaces { once } => run_interfaces(&console, &settings, *once).await?,
    }

    console.finish();
    Ok(())
}

fn print_choices(choices: &[BindChoice]) {
    for (i, choice) in choices.iter().enumerate() {
        let marker = if i == 0 { '*' } else { ' ' };
        println!("{marker} {choice}");
    }
}

async fn run_interfaces(console: &Console, settings: &Settings, once: bool) -> Result<()> {
    let mut choices = BindChoiceWatch::new(RouteProbe, settings.watch_ipv6());
    print_choices(&choices.current());
    if once {
        return Ok(());
    }

    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/ipv6 on" => settings.set_ipv6_enabled(true),
                    "/ipv6 off" => settings.set_ipv6_enabled(false),
                    other => console.report(&format!("unknown command '{other}'")),
                }
            }
            Some(rebuilt) = choices.changed() => {
                println!();
                print_choices(&rebuilt);
            }
        }
    }
    Ok(())
}

async fn run_client(
    console: &mut Console,
    config: TransportConfig,
    host: &str,
    port: u16,
) -> Result<()> {
    let client = TcpClient::new(config);
    let mut events = client.subscribe();
    let mut lines = stdin_lines();
    client.connect(host, port);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line == "/quit" {
                    break;
                }
                let Some(piece) = console.compose(&line) else { continue };
                match client.send(&piece) {
                    Some(result) => console.show(piece.with_endpoints(&result)),
                    None => console.report("not connected"),
                }
            }
            Some(event) = events.recv() => match event {
                TcpClientEvent::Status { status: ClientStatus::Connected, remote: Some(remote) } => {
                    console.set_header(format!("Connected to: < {remote} >"));
                }
                TcpClientEvent::Status { status: ClientStatus::Disconnected, .. } => {
                    console.set_header(history::DEFAULT_HEADER.to_string());
                    break;
                }
                TcpClientEvent::Status { .. } => {}
                TcpClientEvent::Received(piece) => console.show(piece),
                TcpClientEvent::Error(e) => console.report(&e.user_message()),
            },
        }
    }

    client.disconnect();
    Ok(())
}

async fn run_server(
    console: &mut Console,
    config: TransportConfig,
    bind: &str,
    port: u16,
) -> Result<()> {
    let server = TcpServer::new(config);
    let mut events = server.subscribe();
    let mut lines = stdin_lines();

    if let Err(e) = server.start(bind, port).await {
        console.report(&e.user_message());
        return Err(anyhow!(e));
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.as_str() {
                    "/quit" => break,
                    "/disconnect" => {
                        server.disconnect();
                        continue;
                    }
                    _ => {}
                }
                let Some(piece) = console.compose(&line) else { continue };
                match server.send(&piece).await {
                    Ok(Some(result)) => console.show(piece.with_endpoints(&result)),
                    Ok(None) => console.report("no client connected"),
                    Err(e) => console.report(&e.user_message()),
                }
            }
            Some(event) = events.recv() => match event {
                TcpServerEvent::Status { status, local, remote } => match (status, local, remote) {
                    (ServerStatus::Started | ServerStatus::ClientDisconnected, Some(local), _) => {
                        console.set_header(history::listening_header(local));
                    }
                    (ServerStatus::ClientConnected, _, Some(remote)) => {
                        console.set_header(history::connected_header(remote));
                    }
                    _ => console.set_header(history::DEFAULT_HEADER.to_string()),
                },
                TcpServerEvent::ClientRejected(remote) => {
                    console.report(&format!("rejected {remote}: a client is already connected"));
                }
                TcpServerEvent::Received(piece) => console.show(piece),
            },
        }
    }

    server.stop();
    Ok(())
}

async fn run_udp(
    console: &mut Console,
    config: TransportConfig,
    bind: Option<&str>,
    port: u16,
    to: Option<(String, u16)>,
) -> Result<()> {
    let udp = UdpClientServer::new(config);
    let mut events = udp.subscribe();
    let mut lines = stdin_lines();

    if let Some(bind) = bind {
        if let Err(e) = udp.start(bind, port).await {
            console.report(&e.user_message());
            return Err(anyhow!(e));
        }
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line == "/quit" {
                    break;
                }
                let Some((host, dest_port)) = &to else {
                    console.report("no destination; pass --to host:port");
                    continue;
                };
                let Some(piece) = console.compose(&line) else { continue };
                match udp.send_async(host, *dest_port, &piece).await {
                    Ok(result) => console.show(piece.with_endpoints(&result)),
                    Err(e) => console.report(&e.user_message()),
                }
            }
            Some(event) = events.recv() => match event {
                UdpEvent::Status { status: UdpStatus::Started, local: Some(local) } => {
                    console.set_header(history::listening_header(local));
                }
                UdpEvent::Status { .. } => {
                    console.set_header(history::DEFAULT_HEADER.to_string());
                }
                UdpEvent::Received(piece) => console.show(piece),
                UdpEvent::Error(e) => console.report(&e.user_message()),
            },
        }
    }

    udp.stop();
    Ok(())
}
