use owo_colors::{OwoColorize, Style};

/// Emphasis levels used by the terminal views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tone {
    Heading,
    Good,
    Caution,
    Muted,
    Value,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Self::Heading => Style::new().bold().cyan(),
            Self::Good => Style::new().bold().green(),
            Self::Caution => Style::new().bold().yellow(),
            Self::Muted => Style::new().dimmed(),
            Self::Value => Style::new().bold(),
        }
    }
}

/// Colours terminal text, or passes it through when colour is off.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn paint(&self, text: impl AsRef<str>, tone: Tone) -> String {
        let text = text.as_ref();
        if self.use_colour {
            text.style(tone.style()).to_string()
        } else {
            text.to_string()
        }
    }

    pub(crate) fn heading(&self, text: impl AsRef<str>) -> String {
        self.paint(text, Tone::Heading)
    }

    pub(crate) fn muted(&self, text: impl AsRef<str>) -> String {
        self.paint(text, Tone::Muted)
    }

    pub(crate) fn value(&self, text: impl AsRef<str>) -> String {
        self.paint(text, Tone::Value)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::heading(Tone::Heading)]
    #[case::good(Tone::Good)]
    #[case::caution(Tone::Caution)]
    #[case::muted(Tone::Muted)]
    #[case::value(Tone::Value)]
    fn plain_painter_passes_text_through(#[case] tone: Tone) {
        assert_eq!("80.00 kg", Painter::new(false).paint("80.00 kg", tone));
    }

    #[rstest]
    #[case::heading(Tone::Heading)]
    #[case::caution(Tone::Caution)]
    #[case::muted(Tone::Muted)]
    fn colour_painter_wraps_text_in_escapes(#[case] tone: Tone) {
        let styled = Painter::new(true).paint("80.00 kg", tone);
        assert_ne!("80.00 kg", styled);
        assert!(styled.contains("80.00 kg"));
    }
}
