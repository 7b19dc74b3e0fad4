use std::{mem, sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender, unbounded};
use gpui::{
    AnyElement, App, AppContext, Context, IntoElement, ObjectFit, ParentElement, Render,
    RenderImage, SharedString, Styled, StyledImage, TitlebarOptions, Window, WindowOptions, div,
    img, px,
};
use gpui_component::{
    ActiveTheme, Root, StyledExt,
    button::{Button, ButtonVariants},
    h_flex,
    tag::Tag,
    v_flex,
};

use crate::{
    config::TryOnArgs,
    engine::{TryOnSession, capture::CaptureJob},
    model_download::{ModelDownloadEvent, ModelKind, ensure_models_ready},
    pipeline::{DefaultCamera, OrtDetectorFactory, TrackingTarget, default_camera},
};

mod download;
mod main_view;
mod render_util;

type AppSession = TryOnSession<DefaultCamera, OrtDetectorFactory>;

const PREVIEW_WIDTH: f32 = 720.0;
const DEFAULT_PREVIEW_RATIO: f32 = 16.0 / 9.0;

pub fn launch_ui(app: &mut App, args: TryOnArgs) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some(format!("Try on {}", args.name).into()),
            ..Default::default()
        }),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|_| AppView::new(args));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

struct AppView {
    screen: Screen,
    args: TryOnArgs,
    session: Option<AppSession>,
    latest_image: Option<Arc<RenderImage>>,
    preview_ratio: f32,
    capture_message: Option<CaptureMessage>,
    capture_job: Option<CaptureJob>,
    download_rx: Receiver<DownloadMessage>,
    download_handle: thread::JoinHandle<()>,
}

enum Screen {
    Download(DownloadState),
    Main,
}

struct DownloadState {
    model: Option<ModelKind>,
    downloaded: u64,
    total: Option<u64>,
    message: String,
    error: Option<String>,
    finished: bool,
    skip_requested: bool,
}

impl DownloadState {
    fn new() -> Self {
        Self {
            model: None,
            downloaded: 0,
            total: None,
            message: "Preparing landmark models...".to_string(),
            error: None,
            finished: false,
            skip_requested: false,
        }
    }

    fn ready_to_leave(&self) -> bool {
        (self.finished && self.error.is_none()) || self.skip_requested
    }
}

enum DownloadMessage {
    Event(ModelDownloadEvent),
    Error(String),
}

enum CaptureMessage {
    Saving,
    Saved(String),
    Failed(String),
}

impl AppView {
    fn new(args: TryOnArgs) -> Self {
        let (download_tx, download_rx) = unbounded();
        let target = TrackingTarget::for_category(args.category);
        let download_handle = download::spawn_model_download(args.model_dir.clone(), target, download_tx);

        Self {
            screen: Screen::Download(DownloadState::new()),
            args,
            session: None,
            latest_image: None,
            preview_ratio: DEFAULT_PREVIEW_RATIO,
            capture_message: None,
            capture_job: None,
            download_rx,
            download_handle,
        }
    }

    fn start_session_if_needed(&mut self) {
        if self.session.is_some() {
            return;
        }
        let mut session = TryOnSession::new(
            self.args.asset(),
            default_camera(self.args.camera),
            OrtDetectorFactory::new(self.args.model_dir.clone()),
            self.args.session_options(),
        );
        session.open();
        self.session = Some(session);
    }
}

impl Render for AppView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        let screen = mem::replace(&mut self.screen, Screen::Main);
        let (view, screen) = match screen {
            Screen::Download(mut state) => {
                self.poll_download_events(&mut state);
                if state.ready_to_leave() {
                    self.start_session_if_needed();
                    (self.render_main(window, cx), Screen::Main)
                } else {
                    let view = self.render_download_view(&state, cx);
                    (view, Screen::Download(state))
                }
            }
            Screen::Main => (self.render_main(window, cx), Screen::Main),
        };
        self.screen = screen;
        view
    }
}
