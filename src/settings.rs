//! Settings related to the nodepush serial port and device/protocol
//! implementation.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

use std::time::Duration;

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all settings related to the serial port used by `nodepush`, the
/// protocol deadlines and the file synchronization options. Acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// The port name, usually the device path.
    pub path: Option<String>,
    /// The baud rate in symbols-per-second. Also used when reconfiguring the
    /// device UART for the binary block transfer.
    pub baud_rate: u32,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,

    /// The byte sequence terminating every command sent to the firmware.
    /// Escapes (`\n`, `\r`, `\t`) given on the command line are substituted
    /// by the builder.
    pub terminator: String,
    /// Deadline for every single line/byte read from the device.
    pub timeout: Duration,

    /// The Lua file to run after synchronization. Its parent directory is the
    /// default synchronization root.
    pub main_file: Option<String>,
    /// The directory tree pushed to the device. Must also contain the main
    /// file.
    pub root_dir: Option<String>,
    /// Files excluded from synchronization, as forward-slash paths relative
    /// to the root directory.
    pub exclude: Vec<String>,

    /// Push only the main file instead of the whole tree.
    pub only_main: bool,
    /// Remove the files from the device instead of pushing them.
    pub remove_only: bool,
    /// Save only, do not `dofile` the main file at the end.
    pub no_run: bool,
    /// Do not descend into subdirectories of the root.
    pub ignore_dirs: bool,
    /// After running the main file, keep mirroring device output until a key
    /// is pressed.
    pub wait_for_output: bool,
    /// Use the legacy line-based transfer instead of the binary block
    /// transfer.
    pub text_mode: bool,
    /// `node.compile()` every pushed `.lua` file.
    pub compile: bool,
    /// Take the first enumerated port instead of asking.
    pub select_first_port: bool,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```ignore
/// let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl SettingsBuilder {
    /// Start building the settings using default values and no path for the
    /// port.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                path: None,
                baud_rate: 115_200,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                terminator: "\n".into(),
                timeout: Duration::from_millis(10_000),
                main_file: None,
                root_dir: None,
                exclude: Vec::new(),
                only_main: false,
                remove_only: false,
                no_run: false,
                ignore_dirs: false,
                wait_for_output: true,
                text_mode: false,
                compile: false,
                select_first_port: false,
                _private_use_builder: (),
            },
        }
    }

    /// Set the path to the serial port
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().as_ref().to_owned());
        self
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the number of bits used to represent a character sent on the line
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Set the type of signalling to use for controlling data transfer
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Set the type of parity to use for error checking
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Set the number of bits to use to signal the end of a character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    /// Set the command terminator. `\n`, `\r` and `\t` escape sequences are
    /// substituted with the bytes they name, so that a shell argument such as
    /// `-l='\r\n'` produces a CRLF terminator.
    pub fn terminator<'a>(mut self, terminator: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.terminator = unescape_terminator(terminator.into().as_ref());
        self
    }

    /// Set the per-read deadline in milliseconds
    pub fn timeout_ms(mut self, timeout: u64) -> Self {
        self.settings.timeout = Duration::from_millis(timeout);
        self
    }

    /// Set the Lua file to run after synchronization
    pub fn main_file<'a>(mut self, main_file: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.main_file = Some(main_file.into().as_ref().to_owned());
        self
    }

    /// Set the directory tree to be pushed
    pub fn root_dir<'a>(mut self, root_dir: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.root_dir = Some(root_dir.into().as_ref().to_owned());
        self
    }

    /// Set the list of files excluded from synchronization
    pub fn exclude(mut self, exclude: Vec<String>) -> Self {
        self.settings.exclude = exclude;
        self
    }

    pub fn only_main(mut self, only_main: bool) -> Self {
        self.settings.only_main = only_main;
        self
    }

    pub fn remove_only(mut self, remove_only: bool) -> Self {
        self.settings.remove_only = remove_only;
        self
    }

    pub fn no_run(mut self, no_run: bool) -> Self {
        self.settings.no_run = no_run;
        self
    }

    pub fn ignore_dirs(mut self, ignore_dirs: bool) -> Self {
        self.settings.ignore_dirs = ignore_dirs;
        self
    }

    pub fn wait_for_output(mut self, wait_for_output: bool) -> Self {
        self.settings.wait_for_output = wait_for_output;
        self
    }

    pub fn text_mode(mut self, text_mode: bool) -> Self {
        self.settings.text_mode = text_mode;
        self
    }

    pub fn compile(mut self, compile: bool) -> Self {
        self.settings.compile = compile;
        self
    }

    pub fn select_first_port(mut self, select_first_port: bool) -> Self {
        self.settings.select_first_port = select_first_port;
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        SettingsBuilder::new()
    }
}

/// Substitute the `\n`, `\r` and `\t` escapes of a terminator argument with
/// the bytes they name. Any other character is passed through untouched.
pub fn unescape_terminator(value: &str) -> String {
    value
        .replace("\\r", "\r")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
}

// =============================================================================
// Unit Tests
// =============================================================================
