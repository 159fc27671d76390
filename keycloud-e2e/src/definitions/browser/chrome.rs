use std::path::PathBuf;

use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;

use crate::errors::{KeycloudInputError, KeycloudStepError, KeycloudTestFailure};

pub fn image_format(filepath: &PathBuf) -> Result<CaptureScreenshotFormat, KeycloudStepError> {
    match filepath.extension() {
        Some(ext) => {
            let ext = ext.to_string_lossy().to_lowercase();
            match ext.as_str() {
                "png" => Ok(CaptureScreenshotFormat::Png),
                "webp" => Ok(CaptureScreenshotFormat::Webp),
                "jpg" | "jpeg" => Ok(CaptureScreenshotFormat::Jpeg),
                _ => Err(KeycloudStepError::External(
                    KeycloudInputError::StepRequirementsNotMet {
                        reason: "Image file extension must be png, webp, jpeg, or jpg".to_string(),
                    },
                )),
            }
        }
        None => Err(KeycloudStepError::External(
            KeycloudInputError::StepRequirementsNotMet {
                reason: "Image file path must have an extension".to_string(),
            },
        )),
    }
}

/// Poll for an element until it exists or the deadline passes. The bounded
/// poll stands in for the page-readiness signal the dashboard does not
/// expose; the caller's step timeout is the outer bound.
pub async fn wait_for_element_selector(
    page: &chromiumoxide::Page,
    selector: &str,
    timeout_secs: u64,
) -> Result<chromiumoxide::element::Element, KeycloudStepError> {
    let start = std::time::Instant::now();
    while start.elapsed().as_secs() < timeout_secs {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    Err(KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
        msg: format!("Element {selector} could not be found within {timeout_secs}s"),
    }))
}

pub async fn wait_for_xpath_selectors(
    page: &chromiumoxide::Page,
    xpath: &str,
    descriptor: &str,
    timeout_secs: u64,
) -> Result<Vec<chromiumoxide::element::Element>, KeycloudStepError> {
    let start = std::time::Instant::now();
    while start.elapsed().as_secs() < timeout_secs {
        if let Ok(elements) = page.find_xpaths(xpath).await {
            if !elements.is_empty() {
                return Ok(elements);
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    Err(KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
        msg: format!("Element {descriptor} could not be found within {timeout_secs}s"),
    }))
}

pub fn escape_xpath_string(s: &str) -> String {
    if s.contains('\'') {
        // If string contains single quotes, split on them and wrap with xpath's concat()
        let parts: Vec<_> = s.split('\'').collect();
        format!("concat('{}')", parts.join("',\"'\",'"))
    } else {
        format!("'{}'", s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_escaping_xpath_strings() {
        assert_eq!(escape_xpath_string("register"), "'register'");
        assert_eq!(
            escape_xpath_string("alice's vault"),
            "concat('alice',\"'\",'s vault')"
        );
    }

    #[test]
    fn test_image_formats() {
        assert!(matches!(
            image_format(&PathBuf::from("shot.png")),
            Ok(CaptureScreenshotFormat::Png)
        ));
        assert!(matches!(
            image_format(&PathBuf::from("shot.JPG")),
            Ok(CaptureScreenshotFormat::Jpeg)
        ));
        assert!(image_format(&PathBuf::from("shot.tiff")).is_err());
        assert!(image_format(&PathBuf::from("shot")).is_err());
    }
}
