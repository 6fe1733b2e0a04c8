//! ログ初期化
//!
//! `RUST_LOG` が未設定の場合は info レベルで出力します。

/// env_logger を初期化（複数回呼ばれても安全）
pub fn init() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
