fn main() {
    println!("cargo:rerun-if-changed=proto/gtfs_realtime.proto");

    protobuf_codegen::Codegen::new()
        .pure()
        .includes(["proto"])
        .input("proto/gtfs_realtime.proto")
        .cargo_out_dir("protos")
        .run_from_script();
}
