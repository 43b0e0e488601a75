//! # Presentation Module
//!
//! Pure transforms from computed numbers to display artifacts: text progress
//! bars, the monospace menu table, meal breakdowns and PNG charts. Charts are
//! drawn without text; the figures they show travel in the photo caption.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgb, RgbImage};

use crate::localization::t_lang;
use crate::nutrition::{MealAnalysis, MenuPlan, Nutrients};

pub const CHART_WIDTH: u32 = 640;
pub const CHART_HEIGHT: u32 = 360;
const MARGIN: u32 = 24;
const PROGRESS_BAR_WIDTH: usize = 10;
const MAX_PRODUCT_CHARS: usize = 26;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([90, 90, 90]);
const GRID: Rgb<u8> = Rgb([226, 226, 226]);
const TRACK: Rgb<u8> = Rgb([236, 239, 241]);
const BAR: Rgb<u8> = Rgb([76, 175, 80]);
const BAR_OVER: Rgb<u8> = Rgb([229, 115, 115]);
const TARGET: Rgb<u8> = Rgb([33, 150, 243]);
const LINE: Rgb<u8> = Rgb([255, 152, 0]);

/// `█████░░░░░ 50%`; the bar saturates at 100% while the percentage does not
pub fn progress_bar(current: f64, target: f64) -> String {
    let ratio = if target > 0.0 { (current / target).max(0.0) } else { 0.0 };
    let filled = ((ratio.min(1.0) * PROGRESS_BAR_WIDTH as f64).round() as usize).min(PROGRESS_BAR_WIDTH);
    format!(
        "{}{} {:.0}%",
        "█".repeat(filled),
        "░".repeat(PROGRESS_BAR_WIDTH - filled),
        ratio * 100.0
    )
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

fn macro_line(nutrients: &Nutrients, language_code: Option<&str>) -> String {
    format!(
        "{} {:.0} / {} {:.0} / {} {:.0}",
        t_lang("macro-protein-short", language_code),
        nutrients.protein,
        t_lang("macro-fat-short", language_code),
        nutrients.fat,
        t_lang("macro-carbs-short", language_code),
        nutrients.carbs
    )
}

/// Item list of a parsed meal with its totals
pub fn format_meal_breakdown(analysis: &MealAnalysis, language_code: Option<&str>) -> String {
    let kcal = t_lang("unit-kcal", language_code);
    let mut text = String::new();
    for item in &analysis.items {
        let quantity = if item.quantity.is_empty() {
            String::new()
        } else {
            format!(" ({})", item.quantity)
        };
        text.push_str(&format!(
            "• {}{} — {:.0} {}\n",
            item.product, quantity, item.nutrients.calories, kcal
        ));
    }
    if !analysis.items.is_empty() {
        text.push('\n');
    }
    text.push_str(&format!(
        "{}: {:.0} {}\n{}",
        t_lang("meal-total", language_code),
        analysis.total.calories,
        kcal,
        macro_line(&analysis.total, language_code)
    ));
    text
}

/// Monospace table of a generated menu, one block per meal
pub fn menu_table(plan: &MenuPlan, language_code: Option<&str>) -> String {
    let kcal = t_lang("unit-kcal", language_code);
    let mut table = String::new();

    for meal in &plan.meals {
        table.push_str(&format!(
            "{:<width$} {:>6.0} {}\n",
            truncate_chars(&meal.name, MAX_PRODUCT_CHARS + 2),
            meal.totals.calories,
            kcal,
            width = MAX_PRODUCT_CHARS + 2
        ));
        for item in &meal.items {
            let label = if item.quantity.is_empty() {
                item.product.clone()
            } else {
                format!("{} {}", item.product, item.quantity)
            };
            table.push_str(&format!(
                "  {:<width$} {:>6.0}\n",
                truncate_chars(&label, MAX_PRODUCT_CHARS),
                item.nutrients.calories,
                width = MAX_PRODUCT_CHARS
            ));
        }
        table.push('\n');
    }

    table.push_str(&format!(
        "{:<width$} {:>6.0} {}\n{}",
        t_lang("menu-total", language_code),
        plan.totals.calories,
        kcal,
        macro_line(&plan.totals, language_code),
        width = MAX_PRODUCT_CHARS + 2
    ));
    table
}

/// Longest trajectory drawn on the goal chart
pub const MAX_PROJECTION_WEEKS: u32 = 520;

/// Expected weight at the start of each week until the target is reached,
/// cut off after [`MAX_PROJECTION_WEEKS`]
pub fn goal_projection(start_weight: f64, target_weight: f64, kg_per_week: f64) -> Vec<(u32, f64)> {
    if kg_per_week <= 0.0 {
        return vec![(0, start_weight)];
    }
    let distance = (target_weight - start_weight).abs();
    let weeks = (distance / kg_per_week).ceil().min(f64::from(MAX_PROJECTION_WEEKS)) as u32;
    let direction = if target_weight < start_weight { -1.0 } else { 1.0 };

    (0..=weeks)
        .map(|week| {
            let moved = (f64::from(week) * kg_per_week).min(distance);
            (week, start_weight + direction * moved)
        })
        .collect()
}

/// White RGB drawing surface with a fixed plot area
struct Canvas {
    image: RgbImage,
}

impl Canvas {
    fn new() -> Self {
        Self {
            image: RgbImage::from_pixel(CHART_WIDTH, CHART_HEIGHT, BACKGROUND),
        }
    }

    fn left(&self) -> i64 {
        i64::from(MARGIN)
    }

    fn right(&self) -> i64 {
        i64::from(CHART_WIDTH - MARGIN)
    }

    fn top(&self) -> i64 {
        i64::from(MARGIN)
    }

    fn bottom(&self) -> i64 {
        i64::from(CHART_HEIGHT - MARGIN)
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && x < i64::from(CHART_WIDTH) && y < i64::from(CHART_HEIGHT) {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }

    fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
        for y in y0.min(y1)..=y0.max(y1) {
            for x in x0.min(x1)..=x0.max(x1) {
                self.put(x, y, color);
            }
        }
    }

    /// Bresenham line, thickened by stamping a small square
    fn line(&mut self, from: (i64, i64), to: (i64, i64), thickness: i64, color: Rgb<u8>) {
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;
        let half = thickness / 2;

        loop {
            self.fill_rect(x - half, y - half, x + half, y + half, color);
            if x == to.0 && y == to.1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn dashed_hline(&mut self, y: i64, color: Rgb<u8>) {
        let mut x = self.left();
        while x < self.right() {
            self.fill_rect(x, y - 1, (x + 8).min(self.right()), y, color);
            x += 14;
        }
    }

    fn axes_and_grid(&mut self) {
        for step in 1..=4 {
            let y = self.bottom() - (self.bottom() - self.top()) * step / 4;
            self.fill_rect(self.left(), y, self.right(), y, GRID);
        }
        self.fill_rect(self.left(), self.top(), self.left() + 1, self.bottom(), AXIS);
        self.fill_rect(self.left(), self.bottom() - 1, self.right(), self.bottom(), AXIS);
    }

    /// Pixel row for `value` on a linear scale from `min` (bottom) to `max` (top)
    fn y_for(&self, value: f64, min: f64, max: f64) -> i64 {
        let span = (max - min).max(f64::EPSILON);
        let ratio = ((value - min) / span).clamp(0.0, 1.0);
        self.bottom() - (ratio * (self.bottom() - self.top()) as f64).round() as i64
    }

    fn encode(self) -> Result<Vec<u8>> {
        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(self.image.as_raw(), CHART_WIDTH, CHART_HEIGHT, ColorType::Rgb8)
            .context("Failed to encode chart as PNG")?;
        Ok(png)
    }
}

fn scale_max(values: impl Iterator<Item = f64>, target: f64) -> f64 {
    values.fold(target, f64::max).max(1.0) * 1.1
}

/// Daily calories as bars, red above the target, with a dashed target line
pub fn weekly_bar_chart(series: &[(NaiveDate, f64)], target: f64) -> Result<Vec<u8>> {
    let mut canvas = Canvas::new();
    canvas.axes_and_grid();

    let max = scale_max(series.iter().map(|(_, value)| *value), target);
    let slots = series.len().max(1) as i64;
    let slot_width = (canvas.right() - canvas.left()) / slots;
    let gap = slot_width / 5;

    for (index, (_, calories)) in series.iter().enumerate() {
        let x0 = canvas.left() + index as i64 * slot_width + gap;
        let x1 = x0 + slot_width - 2 * gap;
        let y = canvas.y_for(*calories, 0.0, max);
        let color = if target > 0.0 && *calories > target { BAR_OVER } else { BAR };
        if *calories > 0.0 {
            canvas.fill_rect(x0, y, x1, canvas.bottom() - 2, color);
        }
    }

    if target > 0.0 {
        let y = canvas.y_for(target, 0.0, max);
        canvas.dashed_hline(y, TARGET);
    }
    canvas.encode()
}

/// Daily calories as a polyline over the month, with a dashed target line
pub fn monthly_line_chart(series: &[(NaiveDate, f64)], target: f64) -> Result<Vec<u8>> {
    let mut canvas = Canvas::new();
    canvas.axes_and_grid();

    let max = scale_max(series.iter().map(|(_, value)| *value), target);
    if target > 0.0 {
        let y = canvas.y_for(target, 0.0, max);
        canvas.dashed_hline(y, TARGET);
    }

    let steps = (series.len().max(2) - 1) as i64;
    let points: Vec<(i64, i64)> = series
        .iter()
        .enumerate()
        .map(|(index, (_, calories))| {
            let x = canvas.left() + (canvas.right() - canvas.left()) * index as i64 / steps;
            (x, canvas.y_for(*calories, 0.0, max))
        })
        .collect();

    for pair in points.windows(2) {
        canvas.line(pair[0], pair[1], 3, LINE);
    }
    for (x, y) in points {
        canvas.fill_rect(x - 3, y - 3, x + 3, y + 3, LINE);
    }
    canvas.encode()
}

/// Projected weight trajectory toward the target weight
pub fn goal_chart(projection: &[(u32, f64)], target_weight: f64) -> Result<Vec<u8>> {
    let mut canvas = Canvas::new();
    canvas.axes_and_grid();

    let (low, high) = projection
        .iter()
        .map(|(_, weight)| *weight)
        .fold((target_weight, target_weight), |(low, high), w| (low.min(w), high.max(w)));
    let padding = ((high - low) * 0.1).max(1.0);
    let (min, max) = (low - padding, high + padding);

    let target_y = canvas.y_for(target_weight, min, max);
    canvas.dashed_hline(target_y, TARGET);

    let last_week = projection.last().map(|(week, _)| *week).unwrap_or(0).max(1);
    let points: Vec<(i64, i64)> = projection
        .iter()
        .map(|(week, weight)| {
            let x = canvas.left() + (canvas.right() - canvas.left()) * i64::from(*week) / i64::from(last_week);
            (x, canvas.y_for(*weight, min, max))
        })
        .collect();

    for pair in points.windows(2) {
        canvas.line(pair[0], pair[1], 3, LINE);
    }
    if let Some(&(x, y)) = points.first() {
        canvas.fill_rect(x - 4, y - 4, x + 4, y + 4, BAR);
    }
    canvas.encode()
}

/// One horizontal bar per `(current, target)` pair; the track is the target
pub fn progress_chart(rows: &[(f64, f64)]) -> Result<Vec<u8>> {
    let mut canvas = Canvas::new();
    let count = rows.len().max(1) as i64;
    let row_height = (canvas.bottom() - canvas.top()) / count;
    let bar_height = row_height * 3 / 5;
    let width = canvas.right() - canvas.left();

    for (index, (current, target)) in rows.iter().enumerate() {
        let y0 = canvas.top() + index as i64 * row_height + (row_height - bar_height) / 2;
        let y1 = y0 + bar_height;
        let scale = current.max(*target).max(1.0);

        let track_end = canvas.left() + (width as f64 * (target / scale)).round() as i64;
        canvas.fill_rect(canvas.left(), y0, track_end, y1, TRACK);

        if *current > 0.0 {
            let fill_end = canvas.left() + (width as f64 * (current / scale)).round() as i64;
            let color = if current > target { BAR_OVER } else { BAR };
            canvas.fill_rect(canvas.left(), y0, fill_end, y1, color);
        }
        canvas.fill_rect(track_end - 1, y0 - 4, track_end + 1, y1 + 4, TARGET);
    }
    canvas.encode()
}
