use std::{env, path::PathBuf};

const WATCHED_VARIABLES: [&str; 3] = ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_TRIPLET"];

fn main() {
    for variable in WATCHED_VARIABLES {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    // Linux and macOS builds find FFmpeg through pkg-config.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("windows") {
        return;
    }
    if env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    match locate_vcpkg_ffmpeg() {
        Some(directory) if directory.exists() => println!(
            "cargo:warning=Found FFmpeg under {}; set FFMPEG_DIR to that path if linking fails.",
            directory.display()
        ),
        Some(directory) => println!(
            "cargo:warning=No FFmpeg install at {}. Run `vcpkg install ffmpeg` or set FFMPEG_DIR.",
            directory.display()
        ),
        None => println!(
            "cargo:warning=FFmpeg location unknown. Set FFMPEG_DIR (or VCPKG_ROOT) before building filmstrip on Windows."
        ),
    }
}

fn locate_vcpkg_ffmpeg() -> Option<PathBuf> {
    let root = env::var_os("VCPKG_ROOT")?;
    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    Some(PathBuf::from(root).join("installed").join(triplet))
}
