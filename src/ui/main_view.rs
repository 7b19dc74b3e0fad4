use super::render_util::rgba_to_render_image;
use super::{
    ActiveTheme, AnyElement, AppView, Arc, Button, ButtonVariants, CaptureMessage, Context,
    DEFAULT_PREVIEW_RATIO, IntoElement, ObjectFit, PREVIEW_WIDTH, ParentElement, RenderImage,
    SharedString, Styled, StyledImage, Tag, Window, div, h_flex, img, px, v_flex,
};
use crate::types::SessionState;

impl AppView {
    pub(super) fn render_main(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let mut state = SessionState::Idle;
        let mut status = String::new();
        let mut mirrored = self.args.mirrored();
        let mut tracking = String::new();
        let mut jewelry_failed = false;
        self.poll_capture();
        if let Some(session) = self.session.as_mut() {
            session.tick();
            state = session.state();
            status = session.status_text().to_string();
            mirrored = session.is_mirrored();
            jewelry_failed = session.jewelry_failed();
            if session.fallback_mode() {
                tracking = "fixed placement".to_string();
            } else if session.detector_running() {
                tracking = format!("{} tracking", session.tracking_target().label());
            }
            let preview = session.preview_image();
            match preview {
                Some(image) => {
                    if image.height() > 0 {
                        self.preview_ratio = image.width() as f32 / image.height() as f32;
                    }
                    self.replace_latest_image(Some(rgba_to_render_image(image)), window, cx);
                }
                None if state != SessionState::Active => {
                    self.replace_latest_image(None, window, cx);
                }
                None => {}
            }
        }

        let preview_height = PREVIEW_WIDTH / self.preview_ratio.max(0.1);
        let frame_view: AnyElement = if let Some(image) = &self.latest_image {
            img(image.clone())
                .size_full()
                .object_fit(ObjectFit::Contain)
                .into_any_element()
        } else {
            let waiting = match state {
                SessionState::Active | SessionState::Initializing => "Waiting for camera...",
                SessionState::Error => "Camera unavailable",
                SessionState::Idle => "Camera stopped",
            };
            div()
                .size_full()
                .flex()
                .items_center()
                .justify_center()
                .text_sm()
                .text_color(gpui::rgb(0x8b95a5))
                .child(waiting)
                .into_any_element()
        };

        let preview = div()
            .w(px(PREVIEW_WIDTH))
            .h(px(preview_height))
            .overflow_hidden()
            .rounded_lg()
            .bg(gpui::rgb(0x000000))
            .child(frame_view);

        let state_tag = match state {
            SessionState::Active => Tag::success(),
            SessionState::Error => Tag::danger(),
            SessionState::Idle | SessionState::Initializing => Tag::secondary(),
        }
        .rounded_full()
        .child(state.label());

        let status_row = h_flex()
            .w(px(PREVIEW_WIDTH))
            .gap_2()
            .items_center()
            .child(state_tag)
            .child(
                div()
                    .text_sm()
                    .text_color(cx.theme().foreground)
                    .overflow_hidden()
                    .text_ellipsis()
                    .whitespace_nowrap()
                    .child(status),
            )
            .child(
                div()
                    .text_xs()
                    .text_color(cx.theme().muted_foreground)
                    .child(tracking),
            );

        let running = matches!(state, SessionState::Active | SessionState::Initializing);
        let controls = h_flex()
            .gap_2()
            .child(
                Button::new(SharedString::from("capture"))
                    .primary()
                    .label("Capture")
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.capture();
                        cx.notify();
                    })),
            )
            .child(
                Button::new(SharedString::from("mirror-toggle"))
                    .outline()
                    .label(if mirrored { "Mirror: on" } else { "Mirror: off" })
                    .on_click(cx.listener(|this, _, _, cx| {
                        if let Some(session) = this.session.as_mut() {
                            session.toggle_mirror();
                        }
                        cx.notify();
                    })),
            )
            .child(
                Button::new(SharedString::from("restart-camera"))
                    .outline()
                    .label("Restart camera")
                    .on_click(cx.listener(|this, _, window, cx| {
                        if let Some(session) = this.session.as_mut() {
                            session.restart_camera();
                        }
                        this.replace_latest_image(None, window, cx);
                        cx.notify();
                    })),
            )
            .child(
                Button::new(SharedString::from("camera-power"))
                    .ghost()
                    .label(if running { "Stop camera" } else { "Start camera" })
                    .on_click(cx.listener(move |this, _, window, cx| {
                        if let Some(session) = this.session.as_mut() {
                            if running {
                                session.stop_camera();
                            } else {
                                session.open();
                            }
                        }
                        this.replace_latest_image(None, window, cx);
                        cx.notify();
                    })),
            );

        let theme = cx.theme();
        let mut panel = v_flex()
            .gap_3()
            .p_4()
            .rounded_lg()
            .bg(theme.group_box)
            .child(
                div()
                    .text_color(theme.foreground)
                    .child(format!("{} ({})", self.args.name, self.args.category)),
            )
            .child(preview)
            .child(status_row)
            .child(controls);

        if jewelry_failed {
            panel = panel.child(
                Tag::danger()
                    .rounded_full()
                    .child("The jewelry image could not be loaded"),
            );
        }

        match &self.capture_message {
            Some(CaptureMessage::Saving) => {
                panel = panel.child(
                    div()
                        .text_xs()
                        .text_color(theme.muted_foreground)
                        .child("Saving capture..."),
                );
            }
            Some(CaptureMessage::Saved(path)) => {
                panel = panel.child(
                    div()
                        .text_xs()
                        .text_color(theme.muted_foreground)
                        .child(format!("Saved {path}")),
                );
            }
            Some(CaptureMessage::Failed(err)) => {
                panel = panel.child(Tag::danger().rounded_full().child(format!("Capture failed: {err}")));
            }
            None => {}
        }

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .bg(theme.background)
            .child(panel)
            .into_any_element()
    }

    fn capture(&mut self) {
        if self.capture_job.is_some() {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        match session.capture() {
            Some(job) => {
                self.capture_job = Some(job);
                self.capture_message = Some(CaptureMessage::Saving);
            }
            None => {
                self.capture_message = Some(CaptureMessage::Failed("no camera frame yet".to_string()));
            }
        }
    }

    fn poll_capture(&mut self) {
        let Some(result) = self.capture_job.as_ref().and_then(|job| job.poll()) else {
            return;
        };
        self.capture_job = None;
        self.capture_message = Some(match result {
            Ok(path) => CaptureMessage::Saved(path.display().to_string()),
            Err(err) => {
                log::error!("capture failed: {err}");
                CaptureMessage::Failed(err.to_string())
            }
        });
    }

    fn replace_latest_image(
        &mut self,
        new_image: Option<Arc<RenderImage>>,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) {
        let old_image = match new_image {
            Some(image) => self.latest_image.replace(image),
            None => {
                self.preview_ratio = DEFAULT_PREVIEW_RATIO;
                self.latest_image.take()
            }
        };
        if let Some(old_image) = old_image {
            // Free the previous GPU texture; the sprite atlas otherwise keeps every frame.
            cx.drop_image(old_image, Some(window));
        }
    }
}
