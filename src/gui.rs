use std::path::PathBuf;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use eframe::egui;

use crate::audio::{self, WaveformBuffer};
use crate::library::SoundFolders;
use crate::player::Previewer;
use crate::render::LoopStream;
use crate::session::{SampleSource, Session};
use crate::workflow::{DetectionOutcome, WorkflowState};
use crate::{LoopError, LoopSettings, SampleId};

const PREVIEW_REPEATS: u32 = 4;
const LOG_LINES: usize = 200;

pub fn run(settings: LoopSettings, folders: SoundFolders) -> anyhow::Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 680.0])
            .with_min_inner_size([800.0, 560.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Siren Looper",
        options,
        Box::new(move |cc| {
            configure_visuals(&cc.egui_ctx);
            Ok(Box::new(LooperApp::new(settings, folders, cc.egui_ctx.clone())))
        }),
    )
    .map_err(|e| anyhow::anyhow!("GUI Error: {}", e))
}

fn configure_visuals(ctx: &egui::Context) {
    let mut visuals = egui::Visuals::dark();
    visuals.window_corner_radius = egui::CornerRadius::same(8);
    visuals.widgets.noninteractive.bg_fill = egui::Color32::from_gray(20);
    ctx.set_visuals(visuals);
}

/// Results coming back from worker threads.
enum AppMessage {
    Detected(DetectionOutcome),
    Saved(Result<PathBuf, LoopError>),
}

/// What the user asked for during one frame; applied once drawing is done.
enum Action {
    Select(SampleId),
    Import(PathBuf),
    Preview { rank: usize },
    PlayInput(SampleId),
    PlayOutput(String),
    PlayResult,
    Choose(usize),
    Back,
    Render,
    Reset,
    AskDelete(String),
    ConfirmDelete,
    CancelDelete,
    StopPreview,
}

pub struct LooperApp {
    session: Session<SoundFolders>,
    msg_receiver: Receiver<AppMessage>,
    msg_sender: Sender<AppMessage>,
    ctx: egui::Context,
    previewer: Option<Previewer>,

    duration_text: String,
    outputs: Vec<String>,
    pending_delete: Option<String>,
    saving: bool,
    last_saved: Option<PathBuf>,
    last_render: Option<LoopStream>,
    log_lines: Vec<String>,
}

impl LooperApp {
    pub fn new(settings: LoopSettings, folders: SoundFolders, ctx: egui::Context) -> Self {
        let (sender, receiver) = unbounded();
        let previewer = match Previewer::try_default() {
            Ok(p) => Some(p),
            Err(e) => {
                log::warn!("preview disabled: {e:#}");
                None
            }
        };

        let mut app = Self {
            session: Session::open(folders, settings),
            msg_receiver: receiver,
            msg_sender: sender,
            ctx,
            previewer,
            duration_text: "60".to_owned(),
            outputs: Vec::new(),
            pending_delete: None,
            saving: false,
            last_saved: None,
            last_render: None,
            log_lines: Vec::new(),
        };
        app.refresh_outputs();
        app
    }

    fn log(&mut self, line: impl Into<String>) {
        self.log_lines.push(line.into());
        if self.log_lines.len() > LOG_LINES {
            self.log_lines.remove(0);
        }
    }

    fn report(&mut self, err: &LoopError) {
        self.log(format!("{}: {err}", if err.is_warning() { "warning" } else { "error" }));
    }

    fn refresh_outputs(&mut self) {
        match self.session.source().list_outputs() {
            Ok(outputs) => self.outputs = outputs,
            Err(e) => self.log(format!("error: {e:#}")),
        }
    }

    fn start_detection(&mut self, sample: SampleId) {
        self.stop_preview();
        let job = match self.session.begin_detection(&sample) {
            Ok(job) => job,
            Err(e) => return self.report(&e),
        };
        self.log(format!("detecting loop points in {sample}"));

        let sender = self.msg_sender.clone();
        let ctx = self.ctx.clone();
        thread::spawn(move || {
            sender.send(AppMessage::Detected(job.run())).ok();
            ctx.request_repaint();
        });
    }

    fn preview(&mut self, rank: usize) {
        let Some(candidate) = self.session.candidates().and_then(|c| c.get(rank)).copied() else {
            return;
        };
        let (Some(buffer), Some(previewer)) = (self.session.buffer(), self.previewer.as_mut()) else {
            return;
        };
        let range = candidate.start_frame..candidate.end_frame;
        if let Err(e) = previewer.play_range(buffer, range, Some(PREVIEW_REPEATS)) {
            self.log(format!("error: {e:#}"));
        }
    }

    fn play_whole(&mut self, buffer: &WaveformBuffer, label: &str) {
        let Some(previewer) = self.previewer.as_mut() else {
            return;
        };
        match previewer.play_range(buffer, 0..buffer.frame_count(), Some(1)) {
            Ok(()) => self.log(format!("playing {label}")),
            Err(e) => self.log(format!("error: {e:#}")),
        }
    }

    fn play_input(&mut self, sample: SampleId) {
        match self.session.source().load(&sample) {
            Ok(buffer) => self.play_whole(&buffer, sample.as_str()),
            Err(e) => self.report(&e),
        }
    }

    fn play_output(&mut self, name: String) {
        let path = self.session.source().output_dir().join(&name);
        match audio::load_audio_file(&path) {
            Ok(buffer) => self.play_whole(&buffer, &name),
            Err(e) => self.log(format!("error: {e:#}")),
        }
    }

    fn play_result(&mut self) {
        let (Some(stream), Some(previewer)) = (self.last_render.clone(), self.previewer.as_mut()) else {
            return;
        };
        if let Err(e) = previewer.play_stream(stream) {
            self.log(format!("error: {e:#}"));
        }
    }

    fn stop_preview(&mut self) {
        if let Some(previewer) = self.previewer.as_mut() {
            previewer.stop();
        }
    }

    fn render_and_save(&mut self) {
        let secs = match self.duration_text.trim().parse::<f64>() {
            Ok(secs) => secs,
            Err(_) => {
                self.log(format!("error: {:?} is not a number of seconds", self.duration_text));
                return;
            }
        };
        self.stop_preview();
        let rendered = match self.session.submit_duration(secs) {
            Ok(rendered) => rendered,
            Err(e) => return self.report(&e),
        };
        self.log(format!("rendering {secs} s"));
        self.saving = true;
        self.last_render = Some(rendered.stream().clone());

        let folders = self.session.source().clone();
        let sender = self.msg_sender.clone();
        let ctx = self.ctx.clone();
        thread::spawn(move || {
            sender.send(AppMessage::Saved(folders.save(rendered))).ok();
            ctx.request_repaint();
        });
    }

    fn handle_messages(&mut self) {
        while let Ok(msg) = self.msg_receiver.try_recv() {
            match msg {
                AppMessage::Detected(outcome) => {
                    if let Err(e) = self.session.finish_detection(outcome) {
                        self.report(&e);
                    } else if let Some(candidates) = self.session.candidates() {
                        let line = format!("{} candidates found", candidates.len());
                        self.log(line);
                        if let Some(notice) = self.session.notice().cloned() {
                            self.report(&notice);
                        }
                    }
                }
                AppMessage::Saved(result) => {
                    self.saving = false;
                    match result {
                        Ok(path) => {
                            self.log(format!("saved {}", path.display()));
                            self.last_saved = Some(path);
                        }
                        Err(e) => self.report(&e),
                    }
                    self.refresh_outputs();
                }
            }
        }
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::Select(sample) => self.start_detection(sample),
            Action::Import(path) => {
                match self.session.source().import(&path) {
                    Ok(id) => self.log(format!("imported {id}")),
                    Err(e) => self.log(format!("error: {e:#}")),
                }
                self.session.refresh_if_idle();
            }
            Action::Preview { rank } => self.preview(rank),
            Action::PlayInput(sample) => self.play_input(sample),
            Action::PlayOutput(name) => self.play_output(name),
            Action::PlayResult => self.play_result(),
            Action::StopPreview => self.stop_preview(),
            Action::Choose(rank) => {
                if let Err(e) = self.session.choose(Some(rank)) {
                    self.report(&e);
                }
            }
            Action::Back => {
                self.stop_preview();
                if let Err(e) = self.session.back() {
                    self.report(&e);
                }
            }
            Action::Render => self.render_and_save(),
            Action::Reset => {
                self.stop_preview();
                self.last_saved = None;
                self.last_render = None;
                if let Err(e) = self.session.reset() {
                    self.report(&e);
                }
            }
            Action::AskDelete(name) => self.pending_delete = Some(name),
            Action::CancelDelete => self.pending_delete = None,
            Action::ConfirmDelete => {
                if let Some(name) = self.pending_delete.take() {
                    match self.session.source().delete_output(&name) {
                        Ok(()) => self.log(format!("deleted {name}")),
                        Err(e) => self.log(format!("error: {e:#}")),
                    }
                    self.refresh_outputs();
                }
            }
        }
    }

    fn inputs_ui(&self, ui: &mut egui::Ui, actions: &mut Vec<Action>) {
        ui.heading("Input");
        if ui.button("Import…").clicked() {
            if let Some(path) = rfd::FileDialog::new()
                .add_filter("audio", &["wav", "flac", "ogg", "mp3"])
                .pick_file()
            {
                actions.push(Action::Import(path));
            }
        }
        ui.separator();

        let selecting = matches!(self.session.state(), WorkflowState::InputSelect { .. });
        let available = self.session.available();
        if selecting && available.is_empty() {
            ui.label(format!("Drop audio files here or into {}", self.session.source().input_dir().display()));
        }
        egui::ScrollArea::vertical().id_salt("inputs").show(ui, |ui| {
            for sample in available {
                ui.horizontal(|ui| {
                    if ui.small_button("▶").on_hover_text("Play").clicked() {
                        actions.push(Action::PlayInput(sample.clone()));
                    }
                    if ui.add_enabled(selecting, egui::Button::new(sample.as_str())).clicked() {
                        actions.push(Action::Select(sample.clone()));
                    }
                });
            }
        });
    }

    fn outputs_ui(&self, ui: &mut egui::Ui, actions: &mut Vec<Action>) {
        ui.heading("Output");
        let playing = self.previewer.as_ref().is_some_and(|p| p.is_playing());
        if ui.add_enabled(playing, egui::Button::new("⏹ Stop playback")).clicked() {
            actions.push(Action::StopPreview);
        }
        ui.separator();
        if self.outputs.is_empty() {
            ui.label("No loops saved yet");
        }
        egui::ScrollArea::vertical().id_salt("outputs").show(ui, |ui| {
            for name in &self.outputs {
                ui.horizontal(|ui| {
                    if ui.small_button("▶").on_hover_text("Play").clicked() {
                        actions.push(Action::PlayOutput(name.clone()));
                    }
                    if ui.small_button("🗑").on_hover_text("Delete").clicked() {
                        actions.push(Action::AskDelete(name.clone()));
                    }
                    ui.label(name);
                });
            }
        });
    }

    fn workflow_ui(&mut self, ui: &mut egui::Ui, actions: &mut Vec<Action>) {
        if let Some(notice) = self.session.notice() {
            let color = if notice.is_warning() {
                egui::Color32::YELLOW
            } else {
                egui::Color32::RED
            };
            ui.colored_label(color, notice.to_string());
            ui.separator();
        }

        match self.session.state() {
            WorkflowState::InputSelect { .. } => {
                ui.centered_and_justified(|ui| {
                    ui.label(egui::RichText::new("Pick a sample on the left").heading().color(egui::Color32::GRAY));
                });
            }
            WorkflowState::Detecting { sample, .. } => {
                ui.vertical_centered(|ui| {
                    ui.spinner();
                    ui.label(format!("Detecting loop points in {sample}…"));
                    if ui.button("Cancel").clicked() {
                        actions.push(Action::Reset);
                    }
                });
            }
            WorkflowState::CandidateReview { analyzed } => {
                let sr = analyzed.buffer.sample_rate();
                ui.label(format!(
                    "{}: {:.2} s, {} Hz, {} ch",
                    analyzed.sample,
                    analyzed.buffer.duration_secs(),
                    sr,
                    analyzed.buffer.channels()
                ));
                egui::Grid::new("candidates").striped(true).show(ui, |ui| {
                    for header in ["#", "Start (s)", "End (s)", "Length (s)", "Score", "", ""] {
                        ui.strong(header);
                    }
                    ui.end_row();
                    for (rank, c) in analyzed.candidates.iter().enumerate() {
                        ui.label(format!("{}", rank + 1));
                        ui.label(format!("{:.3}", c.start_frame as f64 / sr as f64));
                        ui.label(format!("{:.3}", c.end_frame as f64 / sr as f64));
                        ui.label(format!("{:.3}", c.duration_secs(sr)));
                        ui.label(format!("{:.4}", c.score));
                        if ui.button("▶ Preview").clicked() {
                            actions.push(Action::Preview { rank });
                        }
                        if ui.button("Use").clicked() {
                            actions.push(Action::Choose(rank));
                        }
                        ui.end_row();
                    }
                });
                ui.horizontal(|ui| {
                    if ui.button("⏹ Stop").clicked() {
                        actions.push(Action::StopPreview);
                    }
                    if ui.button("Back").clicked() {
                        actions.push(Action::Back);
                    }
                });
            }
            WorkflowState::DurationEntry { analyzed, rank } => {
                let rank = *rank;
                if let Some(c) = analyzed.candidates.get(rank) {
                    let sr = analyzed.buffer.sample_rate();
                    ui.label(format!(
                        "Candidate #{}: {:.3} s loop (at least {:.3} s of output)",
                        rank + 1,
                        c.duration_secs(sr),
                        c.duration_secs(sr)
                    ));
                }
                ui.horizontal(|ui| {
                    ui.label("Target duration (s):");
                    let edit = ui.text_edit_singleline(&mut self.duration_text);
                    let submitted = edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    if ui.button("Render").clicked() || submitted {
                        actions.push(Action::Render);
                    }
                });
                ui.horizontal(|ui| {
                    if ui.button("▶ Preview").clicked() {
                        actions.push(Action::Preview { rank });
                    }
                    if ui.button("Back").clicked() {
                        actions.push(Action::Back);
                    }
                });
            }
            WorkflowState::Rendering { .. } => {
                ui.spinner();
            }
            WorkflowState::OutputReady { provenance } => {
                ui.vertical_centered(|ui| {
                    if self.saving {
                        ui.spinner();
                        ui.label(format!("Writing {} frames…", provenance.total_frames));
                    } else if let Some(path) = &self.last_saved {
                        ui.label(
                            egui::RichText::new(format!("Saved {}", path.display()))
                                .color(egui::Color32::GREEN)
                                .size(18.0),
                        );
                    }
                    if self.last_render.is_some() && ui.button("▶ Play result").clicked() {
                        actions.push(Action::PlayResult);
                    }
                    if ui.add_enabled(!self.saving, egui::Button::new("Make another loop")).clicked() {
                        actions.push(Action::Reset);
                    }
                });
            }
        }
    }

    fn delete_confirm_ui(&self, ctx: &egui::Context, actions: &mut Vec<Action>) {
        let Some(name) = &self.pending_delete else {
            return;
        };
        egui::Window::new("Delete output?")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .show(ctx, |ui| {
                ui.label(format!("Delete {name}? This cannot be undone."));
                ui.horizontal(|ui| {
                    if ui.button("Delete").clicked() {
                        actions.push(Action::ConfirmDelete);
                    }
                    if ui.button("Cancel").clicked() {
                        actions.push(Action::CancelDelete);
                    }
                });
            });
    }
}

impl eframe::App for LooperApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_messages();
        let mut actions = Vec::new();

        egui::TopBottomPanel::bottom("log")
            .resizable(true)
            .default_height(120.0)
            .show(ctx, |ui| {
                ui.strong("Log");
                egui::ScrollArea::vertical().stick_to_bottom(true).show(ui, |ui| {
                    for line in &self.log_lines {
                        ui.monospace(line);
                    }
                });
            });
        egui::SidePanel::left("inputs")
            .default_width(220.0)
            .show(ctx, |ui| self.inputs_ui(ui, &mut actions));
        egui::SidePanel::right("outputs")
            .default_width(260.0)
            .show(ctx, |ui| self.outputs_ui(ui, &mut actions));
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.spacing_mut().item_spacing = egui::vec2(10.0, 10.0);
            self.workflow_ui(ui, &mut actions);
        });
        self.delete_confirm_ui(ctx, &mut actions);

        for file in ctx.input(|i| i.raw.dropped_files.clone()) {
            if let Some(path) = file.path {
                actions.push(Action::Import(path));
            }
        }

        for action in actions {
            self.apply(action);
        }
    }
}
