use std::fmt::{self, Display, Formatter};

use crate::measurement::{BodyComposition, KG_PER_LB, Reading, WeightUnit};

use super::painter::Painter;
use super::table::Table;

/// Formats a kilogram weight in the unit the user reads their scale in.
pub(crate) fn format_weight(kilograms: f64, unit: WeightUnit) -> String {
    match unit {
        WeightUnit::Kg => format!("{kilograms:.2} kg"),
        WeightUnit::Lbs => format!("{:.2} lb", kilograms / KG_PER_LB),
    }
}

fn format_impedance(impedance: f64) -> String {
    if impedance > 0.0 {
        format!("{impedance:.0} Ω")
    } else {
        "-".to_string()
    }
}

/// Renders a finished body-composition result.
pub(crate) struct CompositionView<'a> {
    composition: &'a BodyComposition,
    unit: WeightUnit,
    painter: &'a Painter,
}

impl<'a> CompositionView<'a> {
    pub(crate) fn new(
        composition: &'a BodyComposition,
        unit: WeightUnit,
        painter: &'a Painter,
    ) -> Self {
        Self {
            composition,
            unit,
            painter,
        }
    }
}

impl Display for CompositionView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let c = self.composition;
        let value = |text: String| self.painter.value(text);
        let table = Table::metrics(
            self.painter,
            vec![
                ("weight", value(format_weight(c.weight, self.unit))),
                ("impedance", value(format_impedance(c.impedance))),
                ("bmi", value(format!("{:.2}", c.bmi))),
                ("body fat", value(format!("{:.2} %", c.body_fat_percent))),
                ("water", value(format!("{:.2} %", c.water_percent))),
                ("bone mass", value(format_weight(c.bone_mass, self.unit))),
                ("muscle mass", value(format_weight(c.muscle_mass, self.unit))),
                ("visceral fat", value(c.visceral_fat.to_string())),
                ("physique rating", value(c.physique_rating.to_string())),
                ("bmr", value(format!("{} kcal", c.bmr))),
                ("metabolic age", value(c.metabolic_age.to_string())),
            ],
        );
        writeln!(f, "{}", self.painter.heading("Body composition"))?;
        write!(f, "{table}")
    }
}

/// Renders a reading taken without computing metrics.
pub(crate) struct RawReadingView<'a> {
    adapter: &'a str,
    reading: &'a Reading,
    unit: WeightUnit,
    painter: &'a Painter,
}

impl<'a> RawReadingView<'a> {
    pub(crate) fn new(
        adapter: &'a str,
        reading: &'a Reading,
        unit: WeightUnit,
        painter: &'a Painter,
    ) -> Self {
        Self {
            adapter,
            reading,
            unit,
            painter,
        }
    }
}

impl Display for RawReadingView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::metrics(
            self.painter,
            vec![
                ("adapter", self.painter.value(self.adapter)),
                (
                    "weight",
                    self.painter
                        .value(format_weight(self.reading.weight, self.unit)),
                ),
                (
                    "impedance",
                    self.painter.value(format_impedance(self.reading.impedance)),
                ),
            ],
        );
        writeln!(f, "{}", self.painter.heading("Raw reading"))?;
        write!(f, "{table}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(80.0, WeightUnit::Kg, "80.00 kg")]
    #[case(45.359_237, WeightUnit::Lbs, "100.00 lb")]
    fn weights_render_in_the_display_unit(
        #[case] kilograms: f64,
        #[case] unit: WeightUnit,
        #[case] expected: &str,
    ) {
        assert_eq!(expected, format_weight(kilograms, unit));
    }

    #[test]
    fn raw_view_marks_missing_impedance() {
        let painter = Painter::new(false);
        let reading = Reading::weight_only(72.5);
        let rendered = RawReadingView::new("xiaomi", &reading, WeightUnit::Kg, &painter).to_string();
        assert!(rendered.starts_with("Raw reading\n"));
        assert!(rendered.contains("72.50 kg"));
        assert!(rendered.contains("xiaomi"));
        assert!(rendered.lines().any(|line| line.contains("impedance") && line.contains('-')));
    }
}
