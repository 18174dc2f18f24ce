extern crate tonic_build;

fn main() {
    tonic_build::configure()
        .build_server(false)
        .compile(&["proto/provider.proto"], &["proto"])
        .unwrap_or_else(|e| panic!("provider protobuf compilation failed: {e}"));
}
