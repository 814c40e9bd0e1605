pub fn run() -> anyhow::Result<()> {
    println!("pvc-viewer {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
