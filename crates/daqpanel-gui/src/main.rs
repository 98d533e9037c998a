use anyhow::{anyhow, Context};
use daqpanel_lib::{
    channel::{ANALOG_CHANNELS, DIGITAL_LINES},
    open_device,
    plot::{Figure, Series, Style},
    AcquisitionStatus, AnalogMode, DaqConfig, DigitalMode, RecordingStatus, Settings,
};
use eframe::{egui, egui::ViewportBuilder};
use egui_plot::{GridMark, Legend, Line, Plot};
use env_logger::Env;
use log::{error, info};
use rfd::FileDialog;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

mod session;

use session::DaqSession;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = Settings::load(None).context("Failed to load settings")?;
    let device = open_device(&settings).context("Failed to open DAQ device")?;
    info!("Using device {}", device.name());
    let session = DaqSession::new(&settings, device, DaqConfig::default())?;
    let app = DaqApp::new(session, settings);

    let native_options = eframe::NativeOptions {
        viewport: ViewportBuilder::default()
            .with_title("NI DAQ Control System")
            .with_inner_size([1100.0, 700.0]),
        ..Default::default()
    };
    eframe::run_native(
        "NI DAQ Control System",
        native_options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
    .map_err(|e| anyhow!("GUI failed: {e}"))
}

#[derive(Copy, Clone, PartialEq)]
enum GuiTab {
    Configuration,
    Plots,
}

impl GuiTab {
    fn title(&self) -> &'static str {
        match self {
            GuiTab::Configuration => "Configuration",
            GuiTab::Plots => "Plots",
        }
    }

    fn all() -> [GuiTab; 2] {
        [GuiTab::Configuration, GuiTab::Plots]
    }
}

enum Notice {
    Error(String),
    Info(String),
}

struct DaqApp {
    session: DaqSession,
    settings: Settings,
    active_tab: GuiTab,
    notices: VecDeque<Notice>,
}

impl DaqApp {
    fn new(session: DaqSession, settings: Settings) -> Self {
        Self {
            session,
            settings,
            active_tab: GuiTab::Configuration,
            notices: VecDeque::new(),
        }
    }

    fn report_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.notices.push_back(Notice::Error(message));
    }

    fn report_saved(&mut self, closed: Option<(PathBuf, u64)>) {
        if let Some((path, rows)) = closed {
            self.notices.push_back(Notice::Info(format!(
                "Recording stopped and saved to: {} ({rows} rows)",
                path.display()
            )));
        }
    }

    fn apply_config(&mut self, config: DaqConfig) {
        match self.session.update_config(config) {
            Ok(closed) => self.report_saved(closed),
            Err(err) => self.report_error(format!("Failed to apply configuration: {err}")),
        }
    }

    fn start_daq(&mut self) {
        match self.session.start() {
            Ok(closed) => self.report_saved(closed),
            Err(err) => self.report_error(format!("Failed to start acquisition: {err}")),
        }
    }

    fn stop_daq(&mut self) {
        match self.session.stop() {
            Ok(closed) => self.report_saved(closed),
            Err(err) => self.report_error(format!("Failed to stop acquisition: {err}")),
        }
    }

    fn start_recording_dialog(&mut self) {
        let default_name = chrono::Local::now()
            .format("daq_recording_%Y%m%d_%H%M%S.csv")
            .to_string();
        if let Some(path) = FileDialog::new()
            .add_filter("CSV", &["csv"])
            .set_file_name(default_name)
            .save_file()
        {
            if let Err(err) = self.session.start_recording(&path) {
                self.report_error(format!("Failed to open file: {err}"));
            }
        }
    }

    fn stop_recording(&mut self) {
        let closed = self.session.stop_recording();
        self.report_saved(closed);
    }

    fn save_config_dialog(&mut self) {
        if let Some(path) = FileDialog::new()
            .add_filter("JSON", &["json"])
            .set_file_name("daq_config.json")
            .save_file()
        {
            if let Err(err) = self.session.config().save(&path) {
                self.report_error(format!("Failed to save config: {err}"));
            }
        }
    }

    fn load_config_dialog(&mut self) {
        if let Some(path) = FileDialog::new().add_filter("JSON", &["json"]).pick_file() {
            self.load_config(&path);
        }
    }

    fn load_config(&mut self, path: &Path) {
        match DaqConfig::load(path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                self.apply_config(config);
            }
            Err(err) => self.report_error(format!("Failed to load config: {err}")),
        }
    }

    fn show_controls(&mut self, ctx: &egui::Context) {
        egui::SidePanel::left("controls")
            .resizable(false)
            .min_width(220.0)
            .show(ctx, |ui| {
                ui.group(|ui| {
                    ui.heading("DAQ Control");
                    let running = self.session.is_running();
                    ui.horizontal(|ui| {
                        if ui.add_enabled(!running, egui::Button::new("Start DAQ")).clicked() {
                            self.start_daq();
                        }
                        if ui.add_enabled(running, egui::Button::new("Stop DAQ")).clicked() {
                            self.stop_daq();
                        }
                    });
                    match self.session.acquisition_status() {
                        AcquisitionStatus::Idle => ui.label("Idle"),
                        AcquisitionStatus::Running { samples } => {
                            ui.label(format!("Running ({samples} samples)"))
                        }
                        AcquisitionStatus::Error(msg) => {
                            ui.colored_label(egui::Color32::LIGHT_RED, msg)
                        }
                    };
                });

                ui.add_space(8.0);
                ui.group(|ui| {
                    ui.heading("Recording");
                    let recording = self.session.is_recording();
                    ui.horizontal(|ui| {
                        if ui
                            .add_enabled(!recording, egui::Button::new("Start Recording"))
                            .clicked()
                        {
                            self.start_recording_dialog();
                        }
                        if ui
                            .add_enabled(recording, egui::Button::new("Stop Recording"))
                            .clicked()
                        {
                            self.stop_recording();
                        }
                    });
                    match self.session.recording_status() {
                        RecordingStatus::Idle => ui.label("Not recording"),
                        RecordingStatus::Active { path, rows } => {
                            ui.label(format!("{rows} rows -> {}", path.display()))
                        }
                        RecordingStatus::Stopped { path, rows } => {
                            ui.label(format!("Saved {rows} rows to {}", path.display()))
                        }
                        RecordingStatus::Error(msg) => {
                            ui.colored_label(egui::Color32::LIGHT_RED, msg)
                        }
                    };
                });

                ui.add_space(8.0);
                ui.group(|ui| {
                    ui.heading("DAQ Outputs");
                    let toggles = *self.session.outputs().toggles();
                    let mut clicked = None;
                    egui::Grid::new("outputs").num_columns(4).show(ui, |ui| {
                        for (line, toggle) in toggles.iter().enumerate() {
                            let button = egui::Button::new(format!("DO{line}"))
                                .selected(toggle.high)
                                .min_size(egui::vec2(44.0, 24.0));
                            if ui.add_enabled(toggle.enabled, button).clicked() {
                                clicked = Some(line as u8);
                            }
                            if line % 4 == 3 {
                                ui.end_row();
                            }
                        }
                    });
                    if let Some(line) = clicked {
                        if let Err(err) = self.session.toggle_output(line) {
                            self.report_error(format!("Failed to set DO{line}: {err}"));
                        }
                    }
                });
            });
    }

    fn show_configuration_tab(&mut self, ctx: &egui::Context) {
        let mut draft = self.session.config().clone();
        let mut save = false;
        let mut load = false;
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Analog Inputs");
            egui::Grid::new("analog_config")
                .num_columns(2)
                .spacing([24.0, 6.0])
                .show(ui, |ui| {
                    for n in 0..ANALOG_CHANNELS {
                        let locked = draft.analog_locked(n);
                        let channel = &mut draft.analog[n];
                        ui.add_enabled(
                            !locked,
                            egui::Checkbox::new(&mut channel.enabled, format!("AI{n}")),
                        );
                        let choices = AnalogMode::choices(n);
                        ui.add_enabled_ui(!locked && choices.len() > 1, |ui| {
                            egui::ComboBox::from_id_salt(("ai_mode", n))
                                .selected_text(channel.mode.label())
                                .show_ui(ui, |ui| {
                                    for mode in choices {
                                        ui.selectable_value(&mut channel.mode, *mode, mode.label());
                                    }
                                });
                        });
                        ui.end_row();
                    }
                });

            ui.separator();
            ui.heading("Digital I/O");
            egui::Grid::new("digital_config")
                .num_columns(2)
                .spacing([24.0, 6.0])
                .show(ui, |ui| {
                    for n in 0..DIGITAL_LINES {
                        let line = &mut draft.digital[n];
                        ui.checkbox(&mut line.enabled, format!("DIO{n}"));
                        egui::ComboBox::from_id_salt(("dio_mode", n))
                            .selected_text(line.mode.label())
                            .show_ui(ui, |ui| {
                                for mode in DigitalMode::all() {
                                    ui.selectable_value(&mut line.mode, mode, mode.label());
                                }
                            });
                        ui.end_row();
                    }
                });

            ui.separator();
            ui.horizontal(|ui| {
                save = ui.button("Save Config").clicked();
                load = ui.button("Load Config").clicked();
            });
        });

        if draft != *self.session.config() {
            self.apply_config(draft);
        }
        if save {
            self.save_config_dialog();
        }
        if load {
            self.load_config_dialog();
        }
    }

    fn show_plots_tab(&mut self, ctx: &egui::Context) {
        let plot = self.session.plot();
        let analog = plot.analog_figure();
        let digital = plot.digital_figure();
        egui::CentralPanel::default().show(ctx, |ui| {
            let height = (ui.available_height() / 2.0 - 8.0).max(120.0);
            Plot::new("analog_plot")
                .height(height)
                .legend(Legend::default())
                .x_axis_label(axis_label(&analog.x.label))
                .y_axis_label(axis_label(&analog.y.label))
                .allow_drag(false)
                .allow_zoom(false)
                .allow_scroll(false)
                .show(ui, |plot_ui| plot_figure(plot_ui, &analog));

            ui.separator();
            let ticks = digital.y.ticks.clone();
            let [y_min, y_max] = digital.y.range.unwrap_or([0.0, 1.0]);
            Plot::new("digital_plot")
                .height(height)
                .x_axis_label(axis_label(&digital.x.label))
                .include_y(y_min)
                .include_y(y_max.max(1.0))
                .allow_drag(false)
                .allow_zoom(false)
                .allow_scroll(false)
                .y_grid_spacer({
                    let ticks = ticks.clone();
                    move |_input| {
                        ticks
                            .iter()
                            .map(|(value, _)| GridMark {
                                value: *value,
                                step_size: 1.0,
                            })
                            .collect()
                    }
                })
                .y_axis_formatter(move |mark, _range| {
                    ticks
                        .iter()
                        .find(|(value, _)| (value - mark.value).abs() < 1e-6)
                        .map(|(_, label)| label.clone())
                        .unwrap_or_default()
                })
                .show(ui, |plot_ui| plot_figure(plot_ui, &digital));
        });
    }

    fn show_notice(&mut self, ctx: &egui::Context) {
        let Some(notice) = self.notices.front() else {
            return;
        };
        let (title, message, color) = match notice {
            Notice::Error(msg) => ("Error", msg.clone(), egui::Color32::LIGHT_RED),
            Notice::Info(msg) => ("Info", msg.clone(), egui::Color32::LIGHT_GREEN),
        };
        let queued = self.notices.len() - 1;
        let mut dismissed = false;
        egui::Modal::new(egui::Id::new("notice")).show(ctx, |ui| {
            ui.set_max_width(420.0);
            ui.heading(title);
            ui.colored_label(color, message);
            if queued > 0 {
                ui.weak(format!("{queued} more pending"));
            }
            ui.separator();
            if ui.button("OK").clicked() {
                dismissed = true;
            }
        });
        if dismissed {
            self.notices.pop_front();
        }
    }
}

impl eframe::App for DaqApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        for message in self.session.pump() {
            self.report_error(message);
        }

        egui::TopBottomPanel::top("top").show(ctx, |ui| {
            ui.horizontal(|ui| {
                for tab in GuiTab::all() {
                    let selected = self.active_tab == tab;
                    if ui.selectable_label(selected, tab.title()).clicked() {
                        self.active_tab = tab;
                    }
                }
            });
        });

        egui::TopBottomPanel::bottom("bottom").show(ctx, |ui| {
            let (plot_drops, record_drops) = self.session.dropped();
            ui.horizontal(|ui| {
                ui.label(format!(
                    "{} | {:.0} Hz",
                    self.settings.device, self.settings.sample_rate_hz
                ));
                ui.separator();
                ui.label(format!("Plot drops: {plot_drops}"));
                ui.label(format!("Record drops: {record_drops}"));
            });
        });

        self.show_controls(ctx);
        match self.active_tab {
            GuiTab::Configuration => self.show_configuration_tab(ctx),
            GuiTab::Plots => self.show_plots_tab(ctx),
        }
        self.show_notice(ctx);

        ctx.request_repaint_after(self.settings.plot_refresh());
    }
}

fn axis_label(label: &Option<String>) -> String {
    label.clone().unwrap_or_default()
}

fn plot_figure(plot_ui: &mut egui_plot::PlotUi, figure: &Figure) {
    for series in &figure.series {
        match series {
            Series::Line(line) => {
                plot_ui.line(
                    Line::new(line.points.clone())
                        .stroke(stroke_from_style(&line.style))
                        .name(line.name.clone()),
                );
            }
        }
    }
}

fn stroke_from_style(style: &Style) -> egui::Stroke {
    let [r, g, b] = style.color.rgb();
    egui::Stroke::new(style.width, egui::Color32::from_rgb(r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use daqpanel_lib::device::SimulatedDevice;

    fn app() -> DaqApp {
        let settings = Settings::default();
        let session = DaqSession::new(
            &settings,
            Box::new(SimulatedDevice::seeded("Dev1", 5)),
            DaqConfig::default(),
        )
        .unwrap();
        DaqApp::new(session, settings)
    }

    #[test]
    fn notices_queue_in_arrival_order() {
        let mut app = app();
        app.report_error("acquisition failed");
        app.report_error("recording failed");
        app.report_saved(Some((PathBuf::from("run.csv"), 12)));
        app.report_saved(None);

        assert_eq!(app.notices.len(), 3);
        assert!(matches!(&app.notices[0], Notice::Error(m) if m == "acquisition failed"));
        assert!(matches!(&app.notices[1], Notice::Error(m) if m == "recording failed"));
        assert!(matches!(&app.notices[2], Notice::Info(m) if m.contains("run.csv (12 rows)")));
    }
}
