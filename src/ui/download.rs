use std::path::PathBuf;

use super::{
    ActiveTheme, AnyElement, AppView, Button, ButtonVariants, Context, DownloadMessage,
    DownloadState, IntoElement, ModelDownloadEvent, ParentElement, Screen, Sender, SharedString,
    Styled, StyledExt, Tag, TrackingTarget, div, ensure_models_ready, h_flex, thread, v_flex,
};

impl AppView {
    pub(super) fn poll_download_events(&mut self, state: &mut DownloadState) {
        while let Ok(msg) = self.download_rx.try_recv() {
            match msg {
                DownloadMessage::Event(ModelDownloadEvent::AlreadyPresent { model }) => {
                    state.model = Some(model);
                    state.message = format!("{} model already present", model.label());
                }
                DownloadMessage::Event(ModelDownloadEvent::Started { model, total }) => {
                    state.model = Some(model);
                    state.downloaded = 0;
                    state.total = total;
                    state.message = format!("Downloading {} model...", model.label());
                }
                DownloadMessage::Event(ModelDownloadEvent::Progress {
                    model,
                    downloaded,
                    total,
                }) => {
                    state.model = Some(model);
                    state.downloaded = downloaded;
                    state.total = total;
                }
                DownloadMessage::Event(ModelDownloadEvent::Finished { model }) => {
                    state.message = format!("{} model ready", model.label());
                }
                DownloadMessage::Error(err) => {
                    state.error = Some(err);
                    state.message = "Model download failed".to_string();
                }
            }
        }

        if !state.finished && state.error.is_none() && self.download_rx.is_empty() {
            state.finished = self.download_handle.is_finished();
        }
    }

    pub(super) fn render_download_view(
        &self,
        state: &DownloadState,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let theme = cx.theme();
        let bar = progress_bar_string(state.downloaded, state.total);
        let detail = match (state.total, state.finished) {
            (_, true) => "Done".to_string(),
            (Some(total), false) if total > 0 => {
                let percent = (state.downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
                format!("{percent:.1}%")
            }
            _ => format!("Downloaded {} KB", state.downloaded / 1024),
        };

        let (status_icon, status_text, status_color) = if state.error.is_some() {
            ("✗", "Download failed", theme.danger)
        } else if state.finished {
            ("✓", "Models ready", theme.success)
        } else {
            ("⟳", "Downloading", theme.foreground)
        };

        let subject = state
            .model
            .map(|model| format!("Preparing {} tracking ({})", self.args.category, model.label()))
            .unwrap_or_else(|| format!("Preparing {} tracking", self.args.category));

        let mut container = v_flex()
            .gap_3()
            .p_6()
            .rounded_lg()
            .border_1()
            .border_color(theme.border)
            .bg(theme.group_box)
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        div()
                            .text_color(status_color)
                            .font_semibold()
                            .child(format!("{status_icon} {status_text}")),
                    )
                    .child(
                        div()
                            .text_sm()
                            .text_color(theme.muted_foreground)
                            .child(subject),
                    ),
            )
            .child(
                div()
                    .px_3()
                    .py_2()
                    .rounded_md()
                    .border_1()
                    .border_color(theme.border)
                    .bg(theme.muted)
                    .font_family(theme.mono_font_family.clone())
                    .text_color(theme.foreground)
                    .child(bar),
            )
            .child(
                div()
                    .text_sm()
                    .text_color(theme.muted_foreground)
                    .child(detail),
            )
            .child(
                div()
                    .text_color(theme.foreground)
                    .child(state.message.clone()),
            );

        if let Some(err) = &state.error {
            container = container
                .child(Tag::danger().rounded_full().child(format!("Error: {err}")))
                .child(
                    Button::new(SharedString::from("continue-without-tracking"))
                        .outline()
                        .label("Continue with fixed placement")
                        .on_click(cx.listener(|this, _, _, cx| {
                            if let Screen::Download(state) = &mut this.screen {
                                state.skip_requested = true;
                            }
                            cx.notify();
                        })),
                );
        }

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .bg(theme.background)
            .child(container)
            .into_any_element()
    }
}

pub(super) fn spawn_model_download(
    model_dir: PathBuf,
    target: TrackingTarget,
    tx: Sender<DownloadMessage>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let result = ensure_models_ready(&model_dir, target.required_models(), |event| {
            let _ = tx.send(DownloadMessage::Event(event));
        });

        if let Err(err) = result {
            log::error!("failed to prepare {} models: {err:?}", target.label());
            let _ = tx.send(DownloadMessage::Error(format!("{err:#}")));
        }
    })
}

fn progress_bar_string(downloaded: u64, total: Option<u64>) -> String {
    const BAR_LEN: usize = 30;
    match total {
        Some(total) if total > 0 => {
            let pct = (downloaded as f64 / total as f64).clamp(0.0, 1.0);
            let filled = ((pct * BAR_LEN as f64).round() as usize).min(BAR_LEN);
            let empty = BAR_LEN.saturating_sub(filled);
            format!(
                "[{}{}] {:>5.1}%",
                "=".repeat(filled),
                " ".repeat(empty),
                pct * 100.0
            )
        }
        _ => {
            let spinner_width = ((downloaded / 64) as usize % BAR_LEN) + 1;
            format!("[{:-<width$}] unknown size", ">", width = spinner_width)
        }
    }
}
