fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 使用内置的 protoc，构建环境不需要预装
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    let well_known = protoc_bin_vendored::include_path()?;

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .include_file("envoy.rs")
        .compile(
            &["proto/envoy/service/auth/v3/external_auth.proto"],
            &[std::path::PathBuf::from("proto"), well_known],
        )?;

    println!("cargo:rerun-if-changed=proto");

    Ok(())
}
