//! Loadcom command line interface.

use std::process;
use std::sync::mpsc;
use std::thread;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, trace, LevelFilter};
use simplelog::*;

use loadcom::{self as lc, DeviceSettings, RunOutcome, Session};

fn main() {
    println!("[LC] loadcom v{}", crate_version!());

    ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        process::exit(0);
    })
    .expect("Failed to install my Ctrl-C handler!");

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Loadcom talks to the BB loader firmware over its USB serial \
            port. When started, it connects to the loader, reads the \
            current device parameters and prints them. Parameters passed on \
            the command line are persisted to the device's own storage \
            before anything else happens.\n\
            \n\
            When a COUNT is given, loadcom starts a counted dispensing run \
            and tracks the device's live progress reports until the \
            firmware signals completion: \n\
               \t* sends START:<count> \n\
               \t* consumes PROGRESS:<remaining> reports \n\
               \t* exits on the FINISHED or STOPPED marker \n\
            \n\
            During the run, press `Esc` or `q` to request an emergency \
            stop; the run ends when the device confirms it.\n\
            \n\
            Loadcom can be started before or after the loader is plugged \
            in; the port is waited for or selected interactively.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the USB tty device to use")
                .long_help(
                    "the USB tty device to use; may change when the loader \
                     is unplugged and re-plugged and may differ between \
                     systems. When not given, the connected serial devices \
                     are offered for selection.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .long_help("serial baud rate; the stock firmware is fixed at 115200")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STEPS_PER_BB")
                .help("stepper steps advanced per BB dispensed")
                .long("--sbb")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("SPEED")
                .help("inter-step delay; smaller is faster")
                .long("--speed")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("RAMP")
                .help("number of acceleration steps")
                .long("--ramp")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("REVERSE")
                .help("stepper direction, 1 for reversed")
                .long("--reverse")
                .takes_value(true)
                .possible_values(&["0", "1"])
                .require_equals(true),
        )
        .arg(
            Arg::with_name("HOLD")
                .help("seconds the motor holds torque after a run")
                .long("--hold")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("COUNT")
                .help("number of BBs to dispense")
                .long_help(
                    "number of BBs to dispense; when not set, loadcom only \
                     connects, applies any parameter changes and prints the \
                     device settings.",
                )
                .index(1),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose"
    // flag (i.e. 'loadcom -v -v -v' or 'loadcom -vvv' vs 'loadcom -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    trace!("{:#?}", matches);

    // It's safe to call unwrap on command line arguments with default
    // values, because the value will either be what the user input at
    // runtime or the default value

    let baud_rate = value_t!(matches.value_of("BAUD_RATE"), u32).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style("baud-rate").cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of("BAUD_RATE").unwrap()).on_red()
        );
        process::exit(-1);
    });

    let mut settings = lc::SettingsBuilder::default().baud_rate(baud_rate).finalize();

    // Acquire an endpoint: wait for the requested one, or offer the list of
    // connected devices for selection.
    match matches.value_of("DEVICE_TTY") {
        Some(path) => {
            if lc::wait_for_endpoint(path) {
                println!("[LC] 🔌 No loader on {}, giving up.", style(path).cyan());
                process::exit(1);
            }
            settings.path = Some(path.into());
        }
        None => loop {
            if let Some(path) = lc::select_endpoint() {
                settings.path = Some(path);
                break;
            }
        },
    }

    let mut session = Session::new(settings);
    match session.connect() {
        Ok(status) => println!("[LC] 🔗 {}", style(status).green()),
        Err(e) => {
            println!("[LC] 💥 {}", style(e).red());
            process::exit(1);
        }
    }

    print_device_settings(session.device_settings());

    if let Some(wanted) = parameter_overrides(&matches, session.device_settings()) {
        match session.save_settings(wanted) {
            Ok(status) => {
                println!("[LC] 💾 {}", style(status).green());
                print_device_settings(session.device_settings());
            }
            Err(e) => {
                println!("[LC] 💥 {}", style(e).red());
                session.disconnect();
                process::exit(1);
            }
        }
    }

    let mut exit_code = 0;
    if matches.is_present("COUNT") {
        let count = value_t!(matches.value_of("COUNT"), u32).unwrap_or_else(|_| {
            println!(
                "{}: `{}` needs to be a numeric value",
                style("error").red(),
                style("COUNT").cyan()
            );
            process::exit(-1);
        });

        exit_code = run_load(&mut session, count);
    }

    session.disconnect();
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

/// Collect the `--sbb/--speed/--ramp/--reverse/--hold` overrides on top of
/// the device's current values, pre-clamped to the firmware ranges.
/// `None` when no override was given.
fn parameter_overrides(
    matches: &clap::ArgMatches,
    current: &DeviceSettings,
) -> Option<DeviceSettings> {
    let mut wanted = *current;
    let mut changed = false;

    if matches.is_present("STEPS_PER_BB") {
        wanted.steps_per_bb = value_t!(matches.value_of("STEPS_PER_BB"), u32)
            .unwrap_or_else(|e| e.exit());
        changed = true;
    }
    if matches.is_present("SPEED") {
        let speed = value_t!(matches.value_of("SPEED"), u32).unwrap_or_else(|e| e.exit());
        wanted.speed = clamped("speed", speed, DeviceSettings::SPEED_RANGE);
        changed = true;
    }
    if matches.is_present("RAMP") {
        let ramp = value_t!(matches.value_of("RAMP"), u32).unwrap_or_else(|e| e.exit());
        wanted.ramp = clamped("ramp", ramp, DeviceSettings::RAMP_RANGE);
        changed = true;
    }
    if matches.is_present("REVERSE") {
        wanted.reverse = matches.value_of("REVERSE").unwrap() == "1";
        changed = true;
    }
    if matches.is_present("HOLD") {
        let hold = value_t!(matches.value_of("HOLD"), u32).unwrap_or_else(|e| e.exit());
        wanted.hold_seconds = clamped("hold", hold, DeviceSettings::HOLD_RANGE);
        changed = true;
    }

    if changed {
        Some(wanted)
    } else {
        None
    }
}

/// Clamp a parameter into the firmware's range, telling the user when the
/// given value was out of bounds. The ranges are advisory; the device
/// remains the source of truth for what it actually stores.
fn clamped(name: &str, value: u32, range: (u32, u32)) -> u32 {
    let clamped = value.max(range.0).min(range.1);
    if clamped != value {
        println!(
            "[LC] ⚠️  {} {} is outside {}..={}, using {}",
            style(name).cyan(),
            value,
            range.0,
            range.1,
            style(clamped).yellow()
        );
    }
    clamped
}

fn print_device_settings(settings: &DeviceSettings) {
    println!("[LC] ⚙️  Device settings:");
    println!("      steps per BB : {}", settings.steps_per_bb);
    println!("      step delay   : {}", settings.speed);
    println!("      ramp steps   : {}", settings.ramp);
    println!(
        "      direction    : {}",
        if settings.reverse { "reversed" } else { "normal" }
    );
    println!("      hold time    : {}s", settings.hold_seconds);
}

/// Execute one dispensing run with a progress bar, cancellable from the
/// keyboard.
fn run_load(session: &mut Session, count: u32) -> i32 {
    println!(
        "[LC] 🚀 Loading {} BBs (press {} to stop)",
        style(count).green(),
        style("Esc").cyan()
    );

    let pb = ProgressBar::new(count.into());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[LC] ⏩ Loading [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .progress_chars("=>-"),
    );

    // The run blocks this thread until the device reports a terminal
    // marker, so cancellation runs on its own thread: it polls the
    // keyboard and trips the session's cancel token, which the run loop
    // observes between reads.
    let token = session.cancel_token();
    let (done_tx, done_rx) = mpsc::channel();
    let keyboard_thread = thread::spawn(move || loop {
        if done_rx.try_recv().is_ok() {
            break;
        }
        if let Ok(cancel) = lc::poll_cancel_key() {
            if cancel {
                token.request_stop();
                break;
            }
        }
    });

    let target = f64::from(count);
    let mut sink = |fraction: f64, label: &str| {
        pb.set_position((fraction * target).round() as u64);
        pb.set_message(label.to_string());
    };
    let result = session.start(count, &mut sink);

    done_tx
        .send(1)
        .expect("an unrecoverable error while sending over done_tx");
    keyboard_thread
        .join()
        .expect("an unrecoverable error while joining the keyboard thread");

    match result {
        Ok(RunOutcome::Finished) => {
            pb.finish_with_message("done");
            println!("[LC] ✅ {}", style("Finished").green());
            0
        }
        Ok(RunOutcome::Stopped) => {
            pb.abandon_with_message("stopped");
            println!("[LC] 🛑 {}", style("Stopped").yellow());
            0
        }
        Ok(RunOutcome::Error(reason)) => {
            pb.abandon_with_message("error");
            println!("[LC] 💥 {}", style(format!("Error: {}", reason)).red());
            println!("[LC] 🔌 Disconnect and reconnect the loader!");
            1
        }
        Err(e) => {
            pb.abandon_with_message("error");
            println!("[LC] 💥 {}", style(e).red());
            1
        }
    }
}
