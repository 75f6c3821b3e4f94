//! Nodepush command line interface.

use std::path::{Path, PathBuf};
use std::process;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
};
use console::style;
use log::{debug, trace, LevelFilter};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use simplelog::*;

use nodepush::{self as np, DeviceManager};

// Exit codes for argument-level failures; protocol failures all map to 1.
const EXIT_BAD_ARGUMENT: i32 = -1;
const EXIT_MAIN_FILE_NOT_FOUND: i32 = 2;
const EXIT_MAIN_FILE_NOT_A_FILE: i32 = 3;
const EXIT_ROOT_NOT_PARENT: i32 = 6;
const EXIT_MAIN_FILE_IN_SUBDIRECTORY: i32 = 11;

fn main() {
    println!("[NP] nodepush v{}", crate_version!());

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
            Nodepush synchronizes a directory of Lua sources with the \
            filesystem of a NodeMCU board over the serial port, then runs \
            the main file and mirrors its output to the terminal.\n\
            \n\
            For every file in the tree (unless excluded), nodepush: \n\
               \t* removes the old copy from the device \n\
               \t* pushes the new content over the REPL \n\
               \t* optionally compiles it with node.compile() \n\
            \n\
            Content is pushed as raw 255-byte blocks acknowledged by the \
            firmware; `--text` falls back to the legacy line-by-line \
            transfer through file.writeline. Note that in text mode a line \
            containing the `]]` delimiter will corrupt the transfer.\n\
            \n\
            Nodepush can be started before or after the board is plugged. \
            It can also properly manage unplugging and re-plugging of the \
            USB cable.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the USB tty device to use")
                .long_help(
                    "the USB tty device to use; may change when the board \
                     is unplugged and re-plugged and may differ between \
                     systems. You can opt for selecting a new device while \
                     `nodepush` is running.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .long_help(
                    "serial baud rate; also pushed to the device UART \
                     before the first binary block transfer",
                )
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .short("-d")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .short("-s")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .short("-p")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .short("-f")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("LINE_END")
                .help("end of command in the firmware REPL")
                .long_help(
                    "end of command in the firmware REPL; \\r, \\n and \\t \
                     escapes are substituted, so both --line-end='\\n' and \
                     --line-end='\\r\\n' work from any shell",
                )
                .short("-l")
                .long("--line-end")
                .takes_value(true)
                .default_value("\\n")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("TIMEOUT")
                .help("deadline for every read from the device, in milliseconds")
                .long("--timeout")
                .takes_value(true)
                .default_value("10000")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("ROOT_DIR")
                .help("directory tree to push; defaults to the main file's parent")
                .short("-r")
                .long("--root")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("EXCLUDE")
                .help("comma-separated files to exclude, relative to the root")
                .short("-e")
                .long("--exclude")
                .takes_value(true)
                .use_delimiter(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("ONLY_MAIN")
                .help("push only the main file")
                .short("-o")
                .long("--only-main"),
        )
        .arg(
            Arg::with_name("REMOVE_ONLY")
                .help("only remove the files from the device")
                .short("-R")
                .long("--remove-only"),
        )
        .arg(
            Arg::with_name("NO_RUN")
                .help("do not execute (dofile) the main file, only save")
                .long("--no-run"),
        )
        .arg(
            Arg::with_name("IGNORE_DIRS")
                .help("ignore files in subdirectories")
                .short("-i")
                .long("--ignore-dirs"),
        )
        .arg(
            Arg::with_name("NO_WAIT")
                .help("do not wait for output after running the main file")
                .long("--no-wait"),
        )
        .arg(
            Arg::with_name("TEXT")
                .help("use the legacy line-based transfer instead of binary blocks")
                .long("--text"),
        )
        .arg(
            Arg::with_name("COMPILE")
                .help("node.compile() every pushed .lua file")
                .short("-c")
                .long("--compile"),
        )
        .arg(
            Arg::with_name("FIRST_PORT")
                .help("select the first detected port without asking")
                .long("--first-port"),
        )
        .arg(
            Arg::with_name("MAIN_FILE")
                .help("the Lua file to run, pushed together with its parent directory")
                .required(true)
                .index(1),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose"
    // flag (i.e. 'nodepush -v -v -v' or 'nodepush -vvv' vs 'nodepush -v'
    let log_level: LevelFilter;
    match matches.occurrences_of("v") {
        0 => log_level = LevelFilter::Warn,
        1 => log_level = LevelFilter::Info,
        2 => log_level = LevelFilter::Debug,
        _ => log_level = LevelFilter::Trace,
    }

    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    trace!("{:#?}", matches);

    // Arguments with default values ===========================================

    // It's safe to call unwrap on all command line arguments with default
    // values, because the value with either be what the user input at
    // runtime or the default value

    let baud_rate = value_t!(matches.value_of("BAUD_RATE"), u32).unwrap_or_else(|_| {
        bad_numeric_argument("baud-rate", matches.value_of("BAUD_RATE").unwrap());
    });

    let timeout = value_t!(matches.value_of("TIMEOUT"), u64).unwrap_or_else(|_| {
        bad_numeric_argument("timeout", matches.value_of("TIMEOUT").unwrap());
    });

    let data_bits = match matches.value_of("DATA_BITS").unwrap() {
        "5" => DataBits::Five,
        "6" => DataBits::Six,
        "7" => DataBits::Seven,
        "8" => DataBits::Eight,
        _ => unreachable!(),
    };

    let stop_bits = match matches.value_of("STOP_BITS").unwrap() {
        "1" => StopBits::One,
        "2" => StopBits::Two,
        _ => unreachable!(),
    };

    let parity = match matches.value_of("PARITY").unwrap() {
        "none" => Parity::None,
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => unreachable!(),
    };

    let flow_control = match matches.value_of("FLOW_CONTROL").unwrap() {
        "none" => FlowControl::None,
        "soft" => FlowControl::Software,
        "hard" => FlowControl::Hardware,
        _ => unreachable!(),
    };

    // END - Arguments with default values =====================================

    // The main file and the root directory ====================================

    let main_file = PathBuf::from(matches.value_of("MAIN_FILE").unwrap());
    if !main_file.exists() {
        eprintln!("File '{}' does not exist!", main_file.display());
        process::exit(EXIT_MAIN_FILE_NOT_FOUND);
    }
    if !main_file.is_file() {
        eprintln!("File '{}' is not a file!", main_file.display());
        process::exit(EXIT_MAIN_FILE_NOT_A_FILE);
    }
    let main_file = main_file.canonicalize().unwrap_or(main_file);

    let root_dir = match matches.value_of("ROOT_DIR") {
        Some(dir) => PathBuf::from(dir).canonicalize().unwrap_or_else(|_| {
            eprintln!("Root directory '{}' does not exist!", dir);
            process::exit(EXIT_ROOT_NOT_PARENT);
        }),
        None => main_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    if !main_file.starts_with(&root_dir) {
        eprintln!("The root directory must also be a parent of the main file!");
        eprintln!("Root dir:  {}", root_dir.display());
        eprintln!("Main file: {}", main_file.display());
        process::exit(EXIT_ROOT_NOT_PARENT);
    }

    if matches.is_present("ONLY_MAIN")
        && matches.is_present("IGNORE_DIRS")
        && main_file.parent() != Some(root_dir.as_path())
    {
        eprintln!(
            "--only-main and --ignore-dirs are both set; the main file \
             cannot live in a subdirectory of the root."
        );
        process::exit(EXIT_MAIN_FILE_IN_SUBDIRECTORY);
    }

    let exclude: Vec<String> = matches
        .values_of("EXCLUDE")
        .map(|values| values.map(String::from).collect())
        .unwrap_or_default();

    // END - Arguments =========================================================

    let mut settings = np::SettingsBuilder::default()
        .baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .terminator(matches.value_of("LINE_END").unwrap())
        .timeout_ms(timeout)
        .main_file(main_file.to_string_lossy())
        .root_dir(root_dir.to_string_lossy())
        .exclude(exclude)
        .only_main(matches.is_present("ONLY_MAIN"))
        .remove_only(matches.is_present("REMOVE_ONLY"))
        .no_run(matches.is_present("NO_RUN"))
        .ignore_dirs(matches.is_present("IGNORE_DIRS"))
        .wait_for_output(!matches.is_present("NO_WAIT"))
        .text_mode(matches.is_present("TEXT"))
        .compile(matches.is_present("COMPILE"))
        .select_first_port(matches.is_present("FIRST_PORT"))
        .finalize();

    if matches.is_present("DEVICE_TTY") {
        settings.path = Some(matches.value_of("DEVICE_TTY").unwrap().into());
    }

    // Run the state machine ===================================================

    let mut session = np::singleton(settings);
    let exit_code = session.run();
    debug!("exit code: {}", exit_code);
    std::process::exit(exit_code.into());
}

fn bad_numeric_argument(name: &str, value: &str) -> ! {
    println!(
        "{}: `{}` needs to be a numeric value",
        style("error").red(),
        style(name).cyan()
    );
    println!(
        "   {} `{}` is not a valid value",
        style("-->").cyan(),
        style(value).on_red()
    );
    process::exit(EXIT_BAD_ARGUMENT);
}
