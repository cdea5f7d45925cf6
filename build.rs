fn main() {
    let now = time::OffsetDateTime::now_utc();
    let stamp = |format: &str| {
        time::format_description::parse(format)
            .ok()
            .and_then(|f| now.format(&f).ok())
            .unwrap_or_else(|| "unknown".to_string())
    };

    let date = std::env::var("USDZ_BUILD_DATE")
        .unwrap_or_else(|_| stamp("[month repr:short] [day padding:space] [year]"));
    let time = std::env::var("USDZ_BUILD_TIME")
        .unwrap_or_else(|_| stamp("[hour]:[minute]:[second]"));

    println!("cargo:rustc-env=USDZ_BUILD_DATE={}", date);
    println!("cargo:rustc-env=USDZ_BUILD_TIME={}", time);
    println!("cargo:rerun-if-env-changed=USDZ_BUILD_DATE");
    println!("cargo:rerun-if-env-changed=USDZ_BUILD_TIME");
}
