//! The arqnet client binary: an interactive prompt over the client driver.

use std::io::{self, Write};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use arqnet_io::{
    client::{Client, ClientError, MessageOutcome},
    config::{ClientConfig, DEFAULT_HOST, DEFAULT_PORT},
};
use arqnet_proto::{
    fault::FaultMode,
    packet::Protocol,
    session::{MAX_MESSAGE_CHARS, MAX_WINDOW, MIN_PAYLOAD_LEN},
};

/// Reliable-transport demo client: segments messages, protects each chunk
/// and delivers them under GBN or SR with optional fault injection.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Server address.
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    /// Server port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// ARQ variant to request: `gbn` or `sr`. Prompted for if omitted.
    #[arg(long, value_parser = parse_protocol)]
    protocol: Option<Protocol>,
    /// Requested cap on message length.
    #[arg(long, default_value_t = MAX_MESSAGE_CHARS)]
    max_chars: usize,
    /// Requested payload chunk size.
    #[arg(long, default_value_t = MIN_PAYLOAD_LEN)]
    packet_size: usize,
    /// Local bound on the window size.
    #[arg(long, default_value_t = MAX_WINDOW)]
    window_size: usize,
    /// Wrap the connection in TLS (the certificate is not verified).
    #[arg(long)]
    ssl: bool,
}

fn parse_protocol(value: &str) -> Result<Protocol, String> {
    value.parse().map_err(|_| {
        format!("`{value}` is not a protocol; use `gbn` or `sr`")
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let protocol = match args.protocol {
        Some(protocol) => protocol,
        None => prompt_protocol()?,
    };
    let config = ClientConfig {
        host: args.host,
        port: args.port,
        protocol,
        max_chars: args.max_chars,
        packet_size: args.packet_size,
        window_size: args.window_size,
        ssl: args.ssl,
    };

    let mut client = Client::connect(&config)?;
    let negotiated = client.negotiated().clone();
    println!(
        "session {} established: protocol={}, max_chars={}, packet_size={}, window={}",
        negotiated.session_id,
        negotiated.params.protocol,
        negotiated.params.max_chars,
        negotiated.params.payload_len,
        negotiated.params.window,
    );

    loop {
        let stats = client.stats();
        println!(
            "\nmessages sent: {} | acks received: {}",
            stats.messages_sent, stats.packets_confirmed
        );

        if let Some((index, mode)) = prompt_fault()? {
            client.arm_fault(index, mode);
            let verb = match mode {
                FaultMode::Corrupt => "corruption",
                FaultMode::Lose => "loss",
            };
            println!("{verb} scheduled for chunk {index} of the next message");
        }

        let Some(line) = prompt(&format!(
            "message (max {} chars) or 'quit': ",
            negotiated.params.max_chars
        ))?
        else {
            break;
        };
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("sair") {
            break;
        }

        match client.send_message(&line) {
            Ok(MessageOutcome::Delivered { attempts }) => {
                println!("message confirmed (attempt {attempts})");
            }
            Ok(MessageOutcome::Abandoned { attempts }) => {
                println!("message abandoned after {attempts} attempts");
            }
            Err(ClientError::EmptyMessage) => println!("error: empty message"),
            Err(err) => return Err(err.into()),
        }
    }

    let stats = client.close()?;
    println!("\nsession statistics:");
    println!("  messages confirmed:  {}", stats.messages_sent);
    println!("  packets sent:        {}", stats.packets_sent);
    println!("  acks received:       {}", stats.packets_confirmed);
    println!("  duration:            {:.1}s", stats.elapsed().as_secs_f64());
    println!("  success rate:        {:.1}%", stats.success_rate());
    Ok(())
}

/// Asks until the user types a valid variant.
fn prompt_protocol() -> io::Result<Protocol> {
    loop {
        let Some(line) = prompt("protocol to use (gbn or sr): ")? else {
            return Ok(Protocol::Gbn);
        };
        match line.to_lowercase().parse() {
            Ok(protocol) => return Ok(protocol),
            Err(_) => println!("invalid option, type 'gbn' or 'sr'"),
        }
    }
}

/// Asks whether to inject a fault into the next message, and into which
/// chunk.
fn prompt_fault() -> io::Result<Option<(usize, FaultMode)>> {
    let Some(line) = prompt("inject a fault into the next message? (c)orrupt / (l)ose / (n)o: ")?
    else {
        return Ok(None);
    };
    let mode = match line.to_lowercase().as_str() {
        "c" => FaultMode::Corrupt,
        "l" | "p" => FaultMode::Lose,
        _ => return Ok(None),
    };
    loop {
        let Some(line) = prompt("chunk index to hit (0, 1, 2...): ")? else {
            return Ok(None);
        };
        match line.parse::<usize>() {
            Ok(index) => return Ok(Some((index, mode))),
            Err(_) => println!("enter a non-negative integer"),
        }
    }
}

/// Reads one trimmed line; [`None`] means stdin is closed.
fn prompt(text: &str) -> io::Result<Option<String>> {
    print!("{text}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_owned()))
}
