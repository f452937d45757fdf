fn main() -> std::process::ExitCode {
    let code = rap_acquire::cli_app::cli_main();
    std::process::ExitCode::from(u8::try_from(code).unwrap_or(1))
}
