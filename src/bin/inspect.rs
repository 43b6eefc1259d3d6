//! EmberKV Inspect Binary
//!
//! Prints the header and records of a store file without opening it as a store.

use std::path::PathBuf;

use clap::Parser;
use emberkv::codec::{NAMED_TAG, NULL_TAG};
use emberkv::varint::{can_read_int, read_int};
use emberkv::store::FORMAT_VERSION;
use emberkv::{FileImage, ObjectCodec};
use tracing_subscriber::{fmt, EnvFilter};

/// EmberKV store file inspector
#[derive(Parser, Debug)]
#[command(name = "emberkv-inspect")]
#[command(about = "Dump the contents of an EmberKV store file")]
#[command(version)]
struct Args {
    /// Store file to read
    file: PathBuf,

    /// Also print a hex preview of each value body
    #[arg(short, long)]
    values: bool,
}

/// Bytes of each value shown with --values
const PREVIEW_LEN: usize = 32;

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,emberkv=debug"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let image = match FileImage::read(&args.file) {
        Ok(Some(image)) => image,
        Ok(None) => {
            println!("{}: empty store", args.file.display());
            return;
        }
        Err(e) => {
            tracing::error!("Failed to read {}: {}", args.file.display(), e);
            std::process::exit(1);
        }
    };

    // Built-in ids resolve the same in every process
    let codec = ObjectCodec::new();

    println!("file:     {}", args.file.display());
    println!("format:   {}", FORMAT_VERSION);
    println!("version:  {}", image.version);
    println!("records:  {}", image.records.len());

    for (key, value) in &image.records {
        let (tag, body) = describe_tag(&codec, value);
        let shown = if key.is_default() {
            "<default>".to_string()
        } else {
            key.to_string()
        };
        println!("  {:<32} {:>8} bytes  {}", shown, value.len(), tag);

        if args.values {
            let preview: Vec<String> = body
                .iter()
                .take(PREVIEW_LEN)
                .map(|b| format!("{:02x}", b))
                .collect();
            let more = if body.len() > PREVIEW_LEN { " .." } else { "" };
            println!("  {:<32} {}{}", "", preview.join(" "), more);
        }
    }
}

/// Resolve the type tag at the start of a value frame
///
/// Returns a printable type and the remaining body bytes.
fn describe_tag<'a>(codec: &ObjectCodec, frame: &'a [u8]) -> (String, &'a [u8]) {
    if !can_read_int(frame) {
        return ("<truncated tag>".to_string(), frame);
    }

    let mut input = frame;
    let tag = match read_int(&mut input, true) {
        Ok(tag) => tag as u32,
        Err(e) => return (format!("<{}>", e), frame),
    };

    match tag {
        NULL_TAG => ("null".to_string(), input),
        NAMED_TAG => {
            if !can_read_int(input) {
                return ("<truncated name>".to_string(), input);
            }
            let len = match read_int(&mut input, true) {
                Ok(len) => len.max(0) as usize,
                Err(e) => return (format!("<{}>", e), input),
            };
            if input.len() < len {
                return ("<truncated name>".to_string(), input);
            }
            let (name, body) = input.split_at(len);
            (format!("{} (by name)", String::from_utf8_lossy(name)), body)
        }
        id => match codec.type_name_of(id) {
            Some(name) => (format!("{} (#{})", name, id), input),
            None => (format!("#{}", id), input),
        },
    }
}
