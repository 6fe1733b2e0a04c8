//! 画像分類のTauriコマンド
//!
//! エラー時はダイアログを表示した上でフロントエンドにもエラー文字列を返します。
//! フロントエンド側は表示状態を変更しません。

use tauri::{AppHandle, State};
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};

use crate::session::PendingImage;
use crate::types::{ClassificationView, LoadedImage};
use crate::AppState;

const IMAGE_FILTER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

fn show_dialog(app: &AppHandle, kind: MessageDialogKind, title: &str, message: &str) {
    app.dialog()
        .message(message)
        .kind(kind)
        .title(title)
        .show(|_| {});
}

fn report_error(app: &AppHandle, message: String) -> String {
    log::error!("{}", message);
    show_dialog(app, MessageDialogKind::Error, "エラー", &message);
    message
}

/// クラス名一覧（ラベルファイル順）
#[tauri::command]
pub fn get_class_names(state: State<AppState>) -> Result<Vec<String>, String> {
    let session = state.session.lock().map_err(|e| e.to_string())?;
    Ok(session.class_names().to_vec())
}

/// 起動直後の表示内容
#[tauri::command]
pub fn get_default_view(state: State<AppState>) -> Result<ClassificationView, String> {
    let session = state.session.lock().map_err(|e| e.to_string())?;
    Ok(session.default_view())
}

/// ファイル選択ダイアログから画像を読み込む
///
/// キャンセル時は `None` を返し、状態は変更しません。
#[tauri::command]
pub async fn open_image(app: AppHandle, state: State<'_, AppState>) -> Result<Option<LoadedImage>, String> {
    let picker_app = app.clone();
    let picked = tokio::task::spawn_blocking(move || {
        picker_app
            .dialog()
            .file()
            .set_title("画像を選択")
            .add_filter("Image files", IMAGE_FILTER_EXTENSIONS)
            .add_filter("All files", &["*"])
            .blocking_pick_file()
    })
    .await
    .map_err(|e| report_error(&app, format!("ファイル選択に失敗しました: {}", e)))?;

    let Some(picked) = picked else {
        return Ok(None);
    };
    let path = picked
        .into_path()
        .map_err(|e| report_error(&app, format!("ファイルパスを取得できません: {}", e)))?;

    let pending = tokio::task::spawn_blocking(move || PendingImage::load(&path))
        .await
        .map_err(|e| report_error(&app, format!("画像の読み込みに失敗しました: {}", e)))?
        .map_err(|e| report_error(&app, format!("{:#}", e)))?;

    let mut session = state
        .session
        .lock()
        .map_err(|e| report_error(&app, e.to_string()))?;
    Ok(Some(session.set_image(pending)))
}

/// 現在の画像を分類
#[tauri::command]
pub fn classify_image(app: AppHandle, state: State<AppState>) -> Result<ClassificationView, String> {
    let session = state
        .session
        .lock()
        .map_err(|e| report_error(&app, e.to_string()))?;

    if !session.has_image() {
        let message = "先に画像を読み込んでください".to_string();
        log::warn!("{}", message);
        show_dialog(&app, MessageDialogKind::Warning, "警告", &message);
        return Err(message);
    }

    session
        .classify()
        .map_err(|e| report_error(&app, format!("分類に失敗しました: {:#}", e)))
}
