use anyhow::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use clap::{Parser, Subcommand, ValueEnum};
use ir_blaster_core::{
    audio::{list_audio_devices, AudioOutput, AudioTransmitter},
    pattern::{clamp_carrier, validate_pattern},
    pcm::build_pcm,
    protocol::{ProtocolKind, WireProtocol},
    transmitter::{transmit_raw, TransmitterState},
    usb::{DeviceFamily, UsbDeviceId},
    ChannelMode, Config, SAMPLE_RATE,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ir-blaster")]
#[command(about = "Infrared transmitter for USB IR dongles and audio-jack LED adapters", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Protocol {
    /// ST...EN run-length format (TIQIAA / older ElkSmart)
    Legacy,
    /// ElkSmart mangled-frequency format
    Elksmart,
}

impl From<Protocol> for ProtocolKind {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::Legacy => ProtocolKind::LegacyBulk,
            Protocol::Elksmart => ProtocolKind::MangledFrequency,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the USB frames a protocol produces for a pattern
    Frames {
        #[arg(long, short, value_enum, default_value = "legacy")]
        protocol: Protocol,

        /// Carrier frequency in Hz
        #[arg(long, short, default_value = "38000")]
        frequency: i64,

        /// Comma-separated ON/OFF durations in microseconds
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        pattern: Vec<i64>,
    },

    /// Write the audio-jack PCM for a pattern as raw 16-bit little-endian samples
    Pcm {
        #[arg(long, short, default_value = "38000")]
        frequency: i64,

        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        pattern: Vec<i64>,

        /// 1 for a single LED, 2 for a dual inverted-LED adapter
        #[arg(long, short, default_value = "2")]
        channels: u16,

        /// Silent frames to prepend
        #[arg(long, default_value = "0")]
        pre_pad: u64,

        #[arg(long, default_value_t = SAMPLE_RATE)]
        sample_rate: u32,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Transmit a pattern through the default audio output
    Play {
        #[arg(long, short, default_value = "38000")]
        frequency: i64,

        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        pattern: Vec<i64>,

        #[arg(long, short, default_value = "2")]
        channels: u16,

        #[arg(long, default_value = "0")]
        pre_pad: u64,
    },

    /// Classify a USB vendor/product ID pair
    Identify {
        /// Vendor ID, hex (e.g. 045c)
        #[arg(long, value_parser = parse_hex_id)]
        vid: u16,

        /// Product ID, hex (e.g. 0195)
        #[arg(long, value_parser = parse_hex_id)]
        pid: u16,
    },

    /// List available audio output devices
    Devices,
}

fn parse_hex_id(s: &str) -> std::result::Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex id '{}': {}", s, e))
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Frames {
            protocol,
            frequency,
            pattern,
        } => {
            let pattern = validate_pattern(&pattern)?;
            let protocol = ProtocolKind::from(protocol).build();
            let frames = protocol.encode(clamp_carrier(frequency), &pattern)?;

            eprintln!("{}: {} frame(s)", protocol.name(), frames.len());
            for frame in frames {
                let hex: Vec<String> = frame.as_bytes().iter().map(|b| format!("{:02x}", b)).collect();
                println!("{}", hex.join(" "));
            }
            eprintln!(
                "post-transmit delay: {} ms",
                protocol.post_transmit_delay(&pattern).as_millis()
            );
        }

        Commands::Pcm {
            frequency,
            pattern,
            channels,
            pre_pad,
            sample_rate,
            out,
        } => {
            let pattern = validate_pattern(&pattern)?;
            let config = Config {
                channels: ChannelMode::from_count(channels),
                pre_pad_frames: pre_pad,
                sample_rate,
            };
            let buffer = build_pcm(config, clamp_carrier(frequency), &pattern);

            let mut writer = BufWriter::new(File::create(&out)?);
            for &sample in &buffer.samples {
                writer.write_i16::<LittleEndian>(sample)?;
            }
            writer.flush()?;

            eprintln!(
                "Wrote {} frames ({} ch, {} Hz, {} ms) to {}",
                buffer.frames(),
                buffer.channels.channel_count(),
                buffer.sample_rate,
                buffer.duration_ms(),
                out.display()
            );
        }

        Commands::Play {
            frequency,
            pattern,
            channels,
            pre_pad,
        } => {
            let config = Config {
                channels: ChannelMode::from_count(channels),
                pre_pad_frames: pre_pad,
                ..Default::default()
            };
            let tx = AudioTransmitter::new(AudioOutput::new()?, config);

            eprintln!("Transmitting...");
            transmit_raw(TransmitterState::Ready(&tx), frequency, &pattern)?;
            eprintln!("Transmission complete!");
        }

        Commands::Identify { vid, pid } => {
            let id = UsbDeviceId {
                vendor_id: vid,
                product_id: pid,
            };
            match DeviceFamily::classify(id) {
                Some(family) => println!("{}: {:?} ({:?})", id, family, family.protocol()),
                None => {
                    println!("{}: not a supported IR dongle", id);
                    std::process::exit(1);
                }
            }
        }

        Commands::Devices => {
            println!("Available audio devices:");
            for device in list_audio_devices() {
                println!("  {}", device);
            }
        }
    }

    Ok(())
}
