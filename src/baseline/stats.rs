//! Statistical primitives for the baseline engine: descriptive summaries,
//! two-sample hypothesis tests, and the special functions they need.
//!
//! Everything operates on plain `&[f64]` slices and is deterministic.

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around `mean`.
pub fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Percentile with linear interpolation. `p` in [0, 100]; input need not
/// be sorted.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}

/// Pearson correlation coefficient; 0 when either side is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let mx = mean(&x[..n]);
    let my = mean(&y[..n]);

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        let dy = y[i] - my;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

/// Outcome of a two-sample hypothesis test.
#[derive(Debug, Clone, Copy)]
pub struct TestOutcome {
    pub statistic: f64,
    pub p_value: f64,
}

/// Two-sample Kolmogorov-Smirnov test with the asymptotic p-value.
pub fn ks_2samp(a: &[f64], b: &[f64]) -> TestOutcome {
    if a.is_empty() || b.is_empty() {
        return TestOutcome {
            statistic: 0.0,
            p_value: 1.0,
        };
    }

    let mut sa = a.to_vec();
    let mut sb = b.to_vec();
    sa.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    sb.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

    let (n1, n2) = (sa.len(), sb.len());
    let (mut i, mut j) = (0usize, 0usize);
    let mut d = 0.0f64;
    while i < n1 && j < n2 {
        let x1 = sa[i];
        let x2 = sb[j];
        let t = x1.min(x2);
        while i < n1 && sa[i] <= t {
            i += 1;
        }
        while j < n2 && sb[j] <= t {
            j += 1;
        }
        let f1 = i as f64 / n1 as f64;
        let f2 = j as f64 / n2 as f64;
        d = d.max((f1 - f2).abs());
    }

    let en = ((n1 * n2) as f64 / (n1 + n2) as f64).sqrt();
    let lambda = (en + 0.12 + 0.11 / en) * d;
    TestOutcome {
        statistic: d,
        p_value: kolmogorov_sf(lambda),
    }
}

/// Survival function of the Kolmogorov distribution.
fn kolmogorov_sf(lambda: f64) -> f64 {
    if lambda < 0.2 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for j in 1..=100 {
        let term = sign * (-2.0 * (j as f64).powi(2) * lambda * lambda).exp();
        sum += term;
        sign = -sign;
        if term.abs() < 1e-10 {
            break;
        }
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

/// Two-sided Mann-Whitney U test (normal approximation, tie-corrected).
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> TestOutcome {
    let n1 = a.len();
    let n2 = b.len();
    if n1 == 0 || n2 == 0 {
        return TestOutcome {
            statistic: 0.0,
            p_value: 1.0,
        };
    }

    // Rank the pooled sample, averaging ranks within ties.
    let mut pooled: Vec<(f64, usize)> = a
        .iter()
        .map(|&v| (v, 0usize))
        .chain(b.iter().map(|&v| (v, 1usize)))
        .collect();
    pooled.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal));

    let n = pooled.len();
    let mut ranks = vec![0.0f64; n];
    let mut tie_term = 0.0f64;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && pooled[j + 1].0 == pooled[i].0 {
            j += 1;
        }
        let avg_rank = (i + j + 2) as f64 / 2.0;
        for rank in ranks.iter_mut().take(j + 1).skip(i) {
            *rank = avg_rank;
        }
        let t = (j - i + 1) as f64;
        tie_term += t * t * t - t;
        i = j + 1;
    }

    let r1: f64 = pooled
        .iter()
        .zip(&ranks)
        .filter(|((_, group), _)| *group == 0)
        .map(|(_, rank)| rank)
        .sum();

    let u1 = r1 - (n1 * (n1 + 1)) as f64 / 2.0;
    let u2 = (n1 * n2) as f64 - u1;
    let u = u1.min(u2);

    let mean_u = (n1 * n2) as f64 / 2.0;
    let nf = n as f64;
    let correction = tie_term / (nf * (nf - 1.0));
    let var_u = (n1 * n2) as f64 / 12.0 * ((nf + 1.0) - correction);
    if var_u <= 0.0 {
        return TestOutcome {
            statistic: u,
            p_value: 1.0,
        };
    }

    let z = (u - mean_u) / var_u.sqrt();
    TestOutcome {
        statistic: u,
        p_value: (2.0 * norm_sf(z.abs())).clamp(0.0, 1.0),
    }
}

/// Levene's test for variance equality, median-centered
/// (Brown-Forsythe variant).
pub fn levene(a: &[f64], b: &[f64]) -> TestOutcome {
    let n1 = a.len();
    let n2 = b.len();
    if n1 < 2 || n2 < 2 {
        return TestOutcome {
            statistic: 0.0,
            p_value: 1.0,
        };
    }

    let med_a = median(a);
    let med_b = median(b);
    let za: Vec<f64> = a.iter().map(|v| (v - med_a).abs()).collect();
    let zb: Vec<f64> = b.iter().map(|v| (v - med_b).abs()).collect();

    let mean_za = mean(&za);
    let mean_zb = mean(&zb);
    let grand = (mean_za * n1 as f64 + mean_zb * n2 as f64) / (n1 + n2) as f64;

    let between =
        n1 as f64 * (mean_za - grand).powi(2) + n2 as f64 * (mean_zb - grand).powi(2);
    let within: f64 = za.iter().map(|z| (z - mean_za).powi(2)).sum::<f64>()
        + zb.iter().map(|z| (z - mean_zb).powi(2)).sum::<f64>();
    if within <= 0.0 {
        let p = if between > 0.0 { 0.0 } else { 1.0 };
        return TestOutcome {
            statistic: 0.0,
            p_value: p,
        };
    }

    let df2 = (n1 + n2 - 2) as f64;
    let w = df2 * between / within;
    TestOutcome {
        statistic: w,
        p_value: f_sf(w, 1.0, df2),
    }
}

/// Deterministic n-point reconstruction of a normal distribution: the
/// (i + 0.5)/n quantiles of N(mean, std).
pub fn normal_quantiles(mean: f64, std: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let p = (i as f64 + 0.5) / n as f64;
            mean + std * inv_norm_cdf(p)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Special functions
// ---------------------------------------------------------------------------

/// Standard normal survival function.
fn norm_sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// Complementary error function (Numerical Recipes rational approximation,
/// fractional error below 1.2e-7).
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let ans = t
        * (-z * z - 1.26551223
            + t * (1.00002368
                + t * (0.37409196
                    + t * (0.09678418
                        + t * (-0.18628806
                            + t * (0.27886807
                                + t * (-1.13520398
                                    + t * (1.48851587
                                        + t * (-0.82215223 + t * 0.17087277)))))))))
        .exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// Inverse standard normal CDF (Acklam's approximation).
fn inv_norm_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if !(0.0..=1.0).contains(&p) || p == 0.0 || p == 1.0 {
        return if p <= 0.0 { f64::NEG_INFINITY } else { f64::INFINITY };
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

/// Survival function of the F distribution with `d1`, `d2` degrees of
/// freedom.
fn f_sf(x: f64, d1: f64, d2: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    incomplete_beta(d2 / 2.0, d1 / 2.0, d2 / (d2 + d1 * x))
}

/// Regularized incomplete beta function I_x(a, b).
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_bt = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let bt = ln_bt.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        bt * beta_cf(a, b, x) / a
    } else {
        1.0 - bt * beta_cf(b, a, 1.0 - x) / b
    }
}

/// Continued fraction for the incomplete beta function.
fn beta_cf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 3e-14;
    const FPMIN: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < FPMIN {
        d = FPMIN;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;

        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Lanczos approximation of ln(Gamma(x)).
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000000000190015;
    for c in COEFFS {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptive_stats() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(mean(&values), 3.0);
        assert!((std_dev(&values, 3.0) - 2.0f64.sqrt()).abs() < 1e-12);

        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert_eq!(percentile(&values, 25.0), 2.0);
    }

    #[test]
    fn test_pearson_correlation() {
        let x: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v + 1.0).collect();
        assert!((pearson(&x, &y) - 1.0).abs() < 1e-12);

        let y_neg: Vec<f64> = x.iter().map(|v| -v).collect();
        assert!((pearson(&x, &y_neg) + 1.0).abs() < 1e-12);

        let constant = vec![5.0; 24];
        assert_eq!(pearson(&x, &constant), 0.0);
    }

    #[test]
    fn test_ks_identical_vs_shifted() {
        let a: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let same = ks_2samp(&a, &a);
        assert_eq!(same.statistic, 0.0);
        assert_eq!(same.p_value, 1.0);

        let shifted: Vec<f64> = a.iter().map(|v| v + 100.0).collect();
        let shift = ks_2samp(&a, &shifted);
        assert!(shift.statistic > 0.4);
        assert!(shift.p_value < 0.01);
    }

    #[test]
    fn test_mann_whitney_detects_median_shift() {
        let a: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..100).map(|i| i as f64 + 60.0).collect();
        let shifted = mann_whitney_u(&a, &b);
        assert!(shifted.p_value < 0.01);

        let same = mann_whitney_u(&a, &a);
        assert!(same.p_value > 0.9);
    }

    #[test]
    fn test_levene_detects_variance_change() {
        // Same spread: tight p-value stays large.
        let a: Vec<f64> = (0..100).map(|i| (i % 10) as f64).collect();
        let same = levene(&a, &a);
        assert!(same.p_value > 0.9);

        // 10x the spread: rejected.
        let b: Vec<f64> = (0..100).map(|i| ((i % 10) * 10) as f64).collect();
        let spread = levene(&a, &b);
        assert!(spread.p_value < 0.01);
    }

    #[test]
    fn test_normal_quantiles_recover_moments() {
        let values = normal_quantiles(50.0, 10.0, 1000);
        let m = mean(&values);
        let s = std_dev(&values, m);
        assert!((m - 50.0).abs() < 0.1);
        assert!((s - 10.0).abs() < 0.2);
    }

    #[test]
    fn test_f_distribution_median() {
        // F(d, d) has median 1.
        assert!((f_sf(1.0, 10.0, 10.0) - 0.5).abs() < 0.01);
        assert!(f_sf(100.0, 1.0, 100.0) < 0.001);
    }
}
