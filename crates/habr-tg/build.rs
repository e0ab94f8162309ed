fn main() -> Result<(), Box<dyn std::error::Error>> {
    // SQLite migrations are embedded with `sqlx::migrate!()`
    println!("cargo:rerun-if-changed=migrations");

    // These are shown by the `/version` maintainer command
    vergen::EmitBuilder::builder()
        .build_timestamp()
        .rustc_semver()
        .rustc_channel()
        .cargo_target_triple()
        .cargo_debug()
        .cargo_opt_level()
        .emit()?;

    Ok(())
}
