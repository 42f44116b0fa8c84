/// oscar-retro ASCII banner
/// Colors match the classic buddy-list yellow/blue theme

// ANSI color codes
const BLUE: &str = "\x1b[38;5;33m";    // buddy-list blue
const YELLOW: &str = "\x1b[38;5;220m"; // running-man yellow
const WHITE: &str = "\x1b[38;5;255m";  // White
const RESET: &str = "\x1b[0m";

pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");

    println!(r#"
{b}
{b}   ██████╗ ███████╗ ██████╗ █████╗ ██████╗       ██████╗ ███████╗████████╗██████╗  ██████╗
{b}  ██╔═══██╗██╔════╝██╔════╝██╔══██╗██╔══██╗      ██╔══██╗██╔════╝╚══██╔══╝██╔══██╗██╔═══██╗
{y}  ██║   ██║███████╗██║     ███████║██████╔╝█████╗██████╔╝█████╗     ██║   ██████╔╝██║   ██║
{y}  ██║   ██║╚════██║██║     ██╔══██║██╔══██╗╚════╝██╔══██╗██╔══╝     ██║   ██╔══██╗██║   ██║
{b}  ╚██████╔╝███████║╚██████╗██║  ██║██║  ██║      ██║  ██║███████╗   ██║   ██║  ██║╚██████╔╝
{b}   ╚═════╝ ╚══════╝ ╚═════╝╚═╝  ╚═╝╚═╝  ╚═╝      ╚═╝  ╚═╝╚══════╝   ╚═╝   ╚═╝  ╚═╝ ╚═════╝
{w}
{w}  Retro IM client core (OFT rendezvous + legacy framing)                    v{version}
{y}  ──────────────────────────────────────────────────────────────────────────────────────
{r}"#,
        y = YELLOW,
        b = BLUE,
        w = WHITE,
        r = RESET,
        version = version
    );
}
