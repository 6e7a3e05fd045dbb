
// Summary statistics for captured channels

pub fn mean(xs:&[f32]) -> f64 {
	if xs.is_empty() {
		return f64::NAN;
	}
	let sum:f64 = xs.iter().map(|x| *x as f64).sum();
	sum / (xs.len() as f64)
}

// Population standard deviation
pub fn std_dev(xs:&[f32]) -> f64 {
	let avg = mean(xs);
	if avg.is_nan() {
		return f64::NAN;
	}
	let ssq:f64 = xs.iter().map(|x| (*x as f64 - avg).powi(2)).sum();
	(ssq / (xs.len() as f64)).sqrt()
}
