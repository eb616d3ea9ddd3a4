//! Human-facing interpretation of `ContentMetrics`.

use super::ContentMetrics;

/// Coarse label for a composite score.
pub fn score_label(score: u32) -> &'static str {
    if score >= 80 {
        "Excellent"
    } else if score >= 60 {
        "Good"
    } else if score >= 40 {
        "Needs Improvement"
    } else {
        "Poor"
    }
}

/// Builds editing suggestions from the metrics, in a stable order.
pub fn recommendations(metrics: &ContentMetrics) -> Vec<String> {
    let mut out = Vec::new();

    if metrics.word_count < 1000 {
        out.push("Consider adding more content (aim for 1000+ words)".to_string());
    } else if metrics.word_count > 2500 {
        out.push("Consider condensing content for better engagement".to_string());
    }

    if metrics.reading_time_minutes > 10 {
        out.push("Content may be too long for most readers".to_string());
    } else if metrics.reading_time_minutes < 3 {
        out.push("Consider expanding content for more depth".to_string());
    }

    if metrics.readability < 60.0 {
        out.push(
            "Improve readability by using shorter sentences and simpler words".to_string(),
        );
    }

    for (keyword, density) in &metrics.keyword_density {
        if *density > 3.0 {
            out.push(format!(
                "Keyword \"{keyword}\" density is too high ({density:.1}%)"
            ));
        } else if *density < 0.5 {
            out.push(format!("Consider using keyword \"{keyword}\" more frequently"));
        }
    }

    out
}
