// The saving made in year `i` compounds for `i` years, so the last one earns nothing.
pub fn expected_value(start: f64, annual_savings: f64, years: u32, growth_rate: f64) -> f64 {
    let factor = 1.0 + growth_rate;
    let mut value = start * factor.powi(years as i32);
    for i in 0..years {
        value += annual_savings * factor.powi(i as i32);
    }
    value
}
