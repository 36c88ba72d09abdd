use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // Only run if feature is enabled
    if env::var("CARGO_FEATURE_MESHTASTIC_PROTO").is_err() {
        return;
    }

    // Use a vendored protoc so builds do not depend on a system package.
    if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
        env::set_var("PROTOC", &path);
        eprintln!("build.rs: Using vendored protoc at {}", path.display());
    }

    println!("cargo:rerun-if-env-changed=MESHTASTIC_PROTO_DIR");
    println!("cargo:rerun-if-changed=protos");

    // MESHTASTIC_PROTO_DIR may point at a full upstream checkout; the bundled
    // subset under protos/ covers the envelope, packet and payload messages we decode.
    let proto_root = PathBuf::from(env::var("MESHTASTIC_PROTO_DIR").unwrap_or_else(|_| "protos".into()));
    let wanted = ["mesh.proto", "mqtt.proto", "portnums.proto", "telemetry.proto"];

    fn collect_protos(dir: &Path, wanted: &[&str], acc: &mut Vec<PathBuf>) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    collect_protos(&path, wanted, acc);
                } else if path
                    .file_name()
                    .and_then(|f| f.to_str())
                    .map(|f| wanted.contains(&f))
                    .unwrap_or(false)
                {
                    acc.push(path);
                }
            }
        }
    }

    let mut protos = Vec::new();
    collect_protos(&proto_root, &wanted, &mut protos);
    protos.sort();
    protos.dedup();

    if protos.len() < wanted.len() {
        panic!(
            "Missing Meshtastic .proto files under '{}' (found {} of {}). Set MESHTASTIC_PROTO_DIR to a directory containing meshtastic/*.proto",
            proto_root.display(),
            protos.len(),
            wanted.len()
        );
    }

    // Imports are written as `meshtastic/<file>.proto`, so the include path is the
    // directory that contains the `meshtastic` folder. Passing the folder itself as
    // well makes protoc see every file twice.
    let include = if proto_root.file_name().and_then(|n| n.to_str()) == Some("meshtastic") {
        proto_root.parent().map(Path::to_path_buf).unwrap_or(proto_root.clone())
    } else {
        proto_root.clone()
    };
    eprintln!("build.rs: Compiling {} proto files (include {:?})", protos.len(), include);

    let mut config = prost_build::Config::new();
    config.bytes(["."]);
    config
        .compile_protos(&protos, &[include])
        .expect("Failed to compile protos");
}
