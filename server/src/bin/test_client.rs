//! Simulated phone controller for exercising a running server by hand

use clap::Parser;
use protocol::{FrameDecoder, Reply, END_OF_COMMAND};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:28910")]
    server: String,
    /// Player name sent with REGISTER
    #[clap(short, long, default_value = "tester")]
    name: String,
    /// Number of input commands to send
    #[clap(short, long, default_value = "20")]
    count: u32,
    /// Delay between inputs in milliseconds
    #[clap(short, long, default_value = "100")]
    delay_ms: u64,
}

/// Prints every server message and forwards parsed replies
async fn read_replies(mut reader: OwnedReadHalf, replies: mpsc::UnboundedSender<Reply>) {
    let mut decoder = FrameDecoder::new(4096);
    let mut buf = [0u8; 1024];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                println!("Server closed the connection");
                return;
            }
            Ok(n) => match decoder.push(&buf[..n]) {
                Ok(messages) => {
                    for message in messages {
                        println!("<- {}", message);
                        if let Some(reply) = Reply::parse(&message) {
                            let _ = replies.send(reply);
                        }
                    }
                }
                Err(e) => {
                    println!("Bad frame from server: {}", e);
                    return;
                }
            },
            Err(e) => {
                println!("Receive failed: {}", e);
                return;
            }
        }
    }
}

fn random_command(player_id: usize, rng: &mut impl Rng) -> String {
    match rng.gen_range(0..3) {
        0 => format!(
            "{}:JOYSTICK:{:.3}:{:.3}",
            player_id,
            rng.gen_range(-1.0f32..=1.0),
            rng.gen_range(-1.0f32..=1.0)
        ),
        1 => format!(
            "{}:GYRO:{:.3}:{:.3}:{:.3}",
            player_id,
            rng.gen_range(-1.0f32..=1.0),
            rng.gen_range(-1.0f32..=1.0),
            rng.gen_range(-1.0f32..=1.0)
        ),
        _ => {
            let key = ["A", "B", "X", "Y"][rng.gen_range(0..4)];
            if rng.gen_bool(0.5) {
                format!("{}:KEY_DOWN:{}", player_id, key)
            } else {
                format!("{}:KEY_DOWN:{}:hold", player_id, key)
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {}", args.server);
    let (reader, mut writer) = stream.into_split();

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(read_replies(reader, reply_tx));

    let register = format!("REGISTER:{}{}", args.name, END_OF_COMMAND);
    println!("-> {}", register);
    writer.write_all(register.as_bytes()).await?;

    let player_id = match reply_rx.recv().await {
        Some(Reply::PlayerId(id)) => id,
        Some(other) => {
            println!("Registration refused: {}", other);
            return Ok(());
        }
        None => {
            println!("No reply to registration");
            return Ok(());
        }
    };
    println!("Registered as player {}", player_id);

    let mut rng = rand::thread_rng();
    for _ in 0..args.count {
        let command = random_command(player_id, &mut rng);
        println!("-> {}", command);
        writer
            .write_all(format!("{}{}", command, END_OF_COMMAND).as_bytes())
            .await?;
        sleep(Duration::from_millis(args.delay_ms)).await;
    }

    let deregister = format!("DEREGISTER:{}{}", player_id, END_OF_COMMAND);
    println!("-> {}", deregister);
    writer.write_all(deregister.as_bytes()).await?;

    // The server closes the connection after a successful deregister
    let _ = reader_task.await;
    println!("Test client finished");

    Ok(())
}
