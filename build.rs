fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::compile_protos("proto/source.proto")?;

    // process groups and parent-death signals are linux only
    if std::env::consts::OS != "linux" {
        panic!("This program only runs on linux");
    }
    Ok(())
}
