//! Print the format, coded items and primary image summary of a HEIF/AVIF file
use std::env;

use heif_coder::{CodecConfig, ContainerHandle, ImageFormat};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <heic-or-avif-file> [--lenient] [--decode]", args[0]);
        std::process::exit(1);
    }

    let path = &args[1];
    let lenient = args.iter().any(|a| a == "--lenient");
    let decode = args.iter().any(|a| a == "--decode");
    let bytes = std::fs::read(path).expect("Failed to read file");

    let format = heif_coder::sniff(&bytes);
    println!("{path}: {format}");
    if format == ImageFormat::Unknown {
        return;
    }

    let config = CodecConfig::default().with_strict(!lenient);
    let handle = match ContainerHandle::parse(&bytes, &config) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Parse error: {e}");
            std::process::exit(2);
        },
    };

    for item in handle.items() {
        println!(
            "  item {:>3} {:?} {:?} {}x{} {} bit {:?} {} bytes in {} extent(s)",
            item.item_id,
            item.codec,
            item.role,
            item.width,
            item.height,
            item.bit_depth,
            item.chroma,
            item.data_len(),
            item.extents.len()
        );
        if let Some(nclx) = &item.nclx {
            println!(
                "      nclx {}/{}/{} full_range={}",
                nclx.colour_primaries, nclx.transfer_characteristics, nclx.matrix_coefficients, nclx.full_range
            );
        }
        if !item.transform.is_identity() {
            println!("      transform {:?}", item.transform);
        }
    }
    println!("Primary: {:?}", handle.info());

    if decode {
        match heif_coder::decode(&bytes, &config) {
            Ok(image) => println!("Decoded {}x{} {:?}", image.width, image.height, image.format),
            Err(e) => println!("Decode failed ({:?}): {e}", e.kind()),
        }
    }
}
