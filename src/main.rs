// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

fn main() {
    rice_classifier_lib::logging::init();

    if let Err(e) = rice_classifier_lib::run() {
        log::error!("アプリケーションの実行中にエラーが発生しました: {}", e);
        std::process::exit(1);
    }
}
