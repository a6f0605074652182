use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use crossterm::style::{Color as CtColor, Stylize};

/// Help output styles shared by the binaries.
pub fn get_styles() -> Styles {
    let heading = Style::new()
        .bold()
        .underline()
        .fg_color(Some(Color::Ansi(AnsiColor::Yellow)));
    Styles::styled()
        .usage(heading)
        .header(heading)
        .literal(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .invalid(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Red))))
        .error(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Red))))
        .valid(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

mod colors {
    use super::CtColor;

    pub const GREEN: CtColor = CtColor::Rgb { r: 80, g: 250, b: 123 };
    pub const RED: CtColor = CtColor::Rgb { r: 255, g: 85, b: 85 };
    pub const ORANGE: CtColor = CtColor::Rgb { r: 255, g: 184, b: 108 };
    pub const DIM: CtColor = CtColor::Rgb { r: 98, g: 114, b: 164 };
    pub const WHITE: CtColor = CtColor::Rgb { r: 248, g: 248, b: 242 };
}

pub fn print_success(message: &str) {
    println!(" {} {}", "✓".with(colors::GREEN).bold(), message.with(colors::GREEN));
}

pub fn print_error(message: &str) {
    eprintln!(" {} {}", "✗".with(colors::RED).bold(), message.with(colors::RED));
}

pub fn print_warning(message: &str) {
    println!(" {} {}", "!".with(colors::ORANGE).bold(), message.with(colors::ORANGE));
}

pub fn print_key_value(key: &str, value: &str) {
    println!(
        "  {} {}",
        format!("{}:", key).with(colors::DIM),
        value.with(colors::WHITE)
    );
}

/// One line per item, indented under the previous header.
pub fn print_list(items: &[String]) {
    for item in items {
        println!("    - {}", item.as_str().with(colors::WHITE));
    }
}
