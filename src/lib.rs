mod ml_commands;
mod types;

pub mod charts;
pub mod error;
pub mod logging;
pub mod ml;
pub mod model;
pub mod session;

pub use error::ClassifierError;
pub use types::{
    bar_width, classification_view, default_bars, probability_bars, result_text, ClassificationView,
    LoadedImage, ProbabilityBar,
};

use std::path::Path;
use std::sync::Mutex;

use burn::backend::NdArray;
use burn_ndarray::NdArrayDevice;
use tauri::{Manager, WebviewUrl, WebviewWindowBuilder};
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};

use ml::InferenceEngine;
use model::AppConfig;
use session::ClassificationSession;

/// GUIで使用するバックエンド（CPU）
pub type GuiBackend = NdArray<f32>;

pub struct AppState {
    session: Mutex<ClassificationSession<GuiBackend>>,
}

impl AppState {
    pub fn new(engine: InferenceEngine<GuiBackend>) -> Self {
        Self {
            session: Mutex::new(ClassificationSession::new(engine)),
        }
    }
}

/// 設定に従ってモデルとラベルを読み込む
pub fn load_engine(config: &AppConfig) -> anyhow::Result<InferenceEngine<GuiBackend>> {
    InferenceEngine::load(
        Path::new(&config.model.model_path),
        Path::new(&config.model.labels_path),
        NdArrayDevice::Cpu,
    )
}

pub fn run() -> tauri::Result<()> {
    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let config = AppConfig::load_or_default();
            match load_engine(&config) {
                Ok(engine) => {
                    app.manage(AppState::new(engine));
                    WebviewWindowBuilder::new(app, "main", WebviewUrl::App("index.html".into()))
                        .title("Rice Classifier")
                        .inner_size(760.0, 560.0)
                        .resizable(false)
                        .build()?;
                }
                Err(e) => {
                    // メインウィンドウは表示せず、ダイアログを閉じたら終了
                    let message = format!("モデルの読み込みに失敗しました:\n{:#}", e);
                    log::error!("{}", message);
                    let handle = app.handle().clone();
                    app.dialog()
                        .message(message)
                        .kind(MessageDialogKind::Error)
                        .title("起動エラー")
                        .show(move |_| handle.exit(1));
                }
            }
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            ml_commands::get_class_names,
            ml_commands::get_default_view,
            ml_commands::open_image,
            ml_commands::classify_image,
        ])
        .run(tauri::generate_context!())
}
