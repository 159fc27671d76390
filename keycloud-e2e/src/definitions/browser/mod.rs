use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use tempfile::tempdir;
use tokio::task::JoinHandle;

use crate::errors::{
    KeycloudInputError, KeycloudInternalError, KeycloudStepError, KeycloudTestFailure,
};
use crate::options::KeycloudParams;
use crate::world::ScenarioWorld;

use super::{KeycloudInstruction, KeycloudRetriever, SegmentArgs};

use chromiumoxide::browser::{Browser, BrowserConfig};

mod chrome;

const HARNESS: &str = include_str!("./harness.js");
const INIT_SCRIPT: &str = include_str!("./init.js");

fn harnessed(js: String) -> String {
    HARNESS.replace("// insert_keycloud_inner_js", &js)
}

fn init_script(timeout_secs: u64) -> String {
    INIT_SCRIPT.replace("DEFAULT_TIMEOUT", &(timeout_secs * 1000).to_string())
}

/// We want selector and URL polls to give up before the step itself does,
/// since they provide a better error. This makes that more likely.
pub(crate) fn poll_deadline_secs(world: &ScenarioWorld) -> u64 {
    world.universe.ctx.params.timeout.saturating_sub(2).max(1)
}

pub(crate) fn require_window(
    world: &ScenarioWorld,
) -> Result<&BrowserWindow, KeycloudStepError> {
    world.window.as_ref().ok_or_else(|| {
        KeycloudStepError::External(KeycloudInputError::StepRequirementsNotMet {
            reason: "no page has been loaded into the browser for this scenario".into(),
        })
    })
}

/// The shared headless Chrome process. Scenarios never talk to it directly;
/// each gets an isolated window via [`BrowserTester::window`].
pub struct BrowserTester {
    browser: Arc<Browser>,
    browser_timeout: u64,
    _event_thread: Arc<JoinHandle<()>>,
}

async fn try_launch_browser(mut max: usize) -> Result<(Browser, chromiumoxide::Handler), KeycloudStepError> {
    let mut launch = Err(CdpError::NotFound);
    while launch.is_err() && max > 0 {
        max -= 1;
        let config = BrowserConfig::builder()
            .headless_mode(chromiumoxide::browser::HeadlessMode::New)
            .user_data_dir(tempdir().map_err(KeycloudInternalError::from)?)
            .viewport(Some(Viewport {
                width: 1600,
                height: 900,
                device_scale_factor: Some(2.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            }))
            .build()
            .map_err(|msg| KeycloudInternalError::Custom { msg })?;

        launch = Browser::launch(config).await;
    }
    launch.map_err(|e| {
        KeycloudStepError::Internal(KeycloudInternalError::Custom {
            msg: format!("Failed to launch the browser: {e}"),
        })
    })
}

impl BrowserTester {
    pub async fn initialize(params: &KeycloudParams) -> Result<Self, KeycloudStepError> {
        let (browser, mut handler) = try_launch_browser(3).await?;

        Ok(BrowserTester {
            browser: Arc::new(browser),
            browser_timeout: params.browser_timeout,
            _event_thread: Arc::new(tokio::task::spawn(async move {
                while handler.next().await.is_some() {}
            })),
        })
    }

    /// Open a fresh window in its own browser context, so scenarios share
    /// no cookies, storage, or session state.
    pub async fn window(&self) -> Result<BrowserWindow, KeycloudStepError> {
        let context = self
            .browser
            .create_browser_context(CreateBrowserContextParams {
                dispose_on_detach: Some(true),
                proxy_server: None,
                proxy_bypass_list: None,
                origins_with_universal_network_access: None,
            })
            .await
            .map_err(KeycloudInternalError::from)?;
        let page = self
            .browser
            .new_page(CreateTargetParams {
                url: "about:blank".to_string(),
                for_tab: None,
                width: None,
                height: None,
                browser_context_id: Some(context),
                enable_begin_frame_control: None,
                new_window: None,
                background: None,
            })
            .await
            .map_err(KeycloudInternalError::from)?;
        page.evaluate_on_new_document(init_script(self.browser_timeout))
            .await
            .map_err(KeycloudInternalError::from)?;

        Ok(BrowserWindow { page })
    }
}

pub struct BrowserWindow {
    page: chromiumoxide::Page,
}

impl BrowserWindow {
    pub async fn navigate(&self, url: String) -> Result<(), KeycloudStepError> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|inner| KeycloudStepError::Internal(inner.into()))
    }

    pub async fn current_url(&self) -> Result<String, KeycloudStepError> {
        self.page
            .url()
            .await
            .map_err(|inner| KeycloudStepError::Internal(inner.into()))?
            .ok_or_else(|| {
                KeycloudStepError::Internal(KeycloudInternalError::Custom {
                    msg: "the browser window has no URL".to_string(),
                })
            })
    }

    pub async fn evaluate_script(
        &self,
        script: String,
    ) -> Result<Option<serde_json::Value>, KeycloudStepError> {
        let res = self
            .page
            .evaluate_function(format!("async function() {{{}}}", harnessed(script)))
            .await
            .map_err(|inner| KeycloudStepError::Internal(inner.into()))?;

        Ok(res.object().value.clone())
    }

    pub async fn screenshot_viewport(&self, filepath: PathBuf) -> Result<(), KeycloudStepError> {
        let image_format = chrome::image_format(&filepath)?;

        self.page
            .save_screenshot(
                ScreenshotParams {
                    cdp_params: CaptureScreenshotParams {
                        format: Some(image_format),
                        ..CaptureScreenshotParams::default()
                    },
                    full_page: Some(false),
                    omit_background: Some(false),
                },
                filepath,
            )
            .await
            .map(|_| ())
            .map_err(|e| KeycloudStepError::Internal(e.into()))
    }

    /// Scroll an element into view and return its clickable center.
    /// Returns `Ok(None)` when the element detached from the DOM while we
    /// were working with it, in which case the caller should re-select.
    async fn clickable_center(
        &self,
        element: &chromiumoxide::element::Element,
        descriptor: &str,
    ) -> Result<Option<chromiumoxide::layout::Point>, KeycloudStepError> {
        if let Err(e) = element.scroll_into_view().await {
            return match e {
                CdpError::ScrollingFailed(msg) if msg.contains("detached") => Ok(None),
                _ => Err(KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
                    msg: format!("Element {descriptor} could not be scrolled into view: {e}"),
                })),
            };
        }

        match element.clickable_point().await {
            Ok(center) => Ok(Some(center)),
            Err(e) => {
                if let Ok(res) = element
                    .call_js_fn("async function() { return this.isConnected; }", true)
                    .await
                {
                    if matches!(res.result.value, Some(serde_json::Value::Bool(false))) {
                        return Ok(None);
                    }
                }

                Err(KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
                    msg: format!("Could not find a clickable point for {descriptor}: {e}"),
                }))
            }
        }
    }

    pub async fn click_selector(
        &self,
        selector: &str,
        timeout_secs: u64,
    ) -> Result<(), KeycloudStepError> {
        loop {
            let element =
                chrome::wait_for_element_selector(&self.page, selector, timeout_secs).await?;

            let Some(center) = self.clickable_center(&element, selector).await? else {
                // The element detached after we selected it; select again.
                continue;
            };

            self.page.click(center).await.map_err(|e| {
                KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
                    msg: format!("Element {selector} could not be clicked: {e}"),
                })
            })?;

            return Ok(());
        }
    }

    pub async fn click_text(&self, text: &str, timeout_secs: u64) -> Result<(), KeycloudStepError> {
        let text = text.to_lowercase();
        let selector_text = chrome::escape_xpath_string(&text);
        let el_xpath = |el: &str| {
            format!("//{el}[contains(translate(., 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz'), {selector_text})]")
        };
        let xpath = [
            el_xpath("a"),
            el_xpath("button"),
            el_xpath("input"),
            el_xpath("option"),
            el_xpath("*[@role='button']"),
            el_xpath("*[@role='option']"),
        ]
        .join(" | ");

        loop {
            let elements = chrome::wait_for_xpath_selectors(
                &self.page,
                &xpath,
                &format!("with text '{text}'"),
                timeout_secs,
            )
            .await?;

            if elements.len() > 1 {
                return Err(KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
                    msg: format!("Found more than one clickable element containing text '{text}'."),
                }));
            }

            let Some(center) = self
                .clickable_center(&elements[0], &format!("with text '{text}'"))
                .await?
            else {
                continue;
            };

            self.page.click(center).await.map_err(|e| {
                KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
                    msg: format!("Element with text '{text}' could not be clicked: {e}"),
                })
            })?;

            return Ok(());
        }
    }

    pub async fn type_into(
        &self,
        selector: &str,
        text: &str,
        timeout_secs: u64,
    ) -> Result<(), KeycloudStepError> {
        let element = chrome::wait_for_element_selector(&self.page, selector, timeout_secs).await?;

        element.focus().await.map_err(|e| {
            KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
                msg: format!("Element {selector} could not be focused: {e}"),
            })
        })?;

        element.type_str(text).await.map_err(|e| {
            KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
                msg: format!("Could not type into {selector}: {e}"),
            })
        })?;

        Ok(())
    }

    pub async fn press_key(&self, key: &str, timeout_secs: u64) -> Result<(), KeycloudStepError> {
        let dom = chrome::wait_for_element_selector(&self.page, "body", timeout_secs).await?;

        dom.press_key(key).await.map_err(|e| {
            KeycloudStepError::Assertion(KeycloudTestFailure::Custom {
                msg: format!("Key {key} could not be pressed: {e}"),
            })
        })?;

        Ok(())
    }

    pub async fn close(self) -> Result<(), KeycloudStepError> {
        self.page
            .close()
            .await
            .map_err(|inner| KeycloudStepError::Internal(inner.into()))
    }
}

mod load_page {
    use super::*;

    pub struct LoadPage;

    inventory::submit! {
        &LoadPage as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for LoadPage {
        fn segments(&self) -> &'static str {
            "In my browser, I load {url}"
        }

        async fn run(
            &self,
            args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let url = world.resolve_url(&args.get_string("url")?);

            let window = world.ensure_window().await?;

            window.navigate(url).await
        }
    }
}

mod eval_js {
    use super::*;

    pub(crate) async fn eval_and_return_js(
        js: String,
        world: &mut ScenarioWorld,
    ) -> Result<serde_json::Value, KeycloudStepError> {
        let window = require_window(world)?;

        let value = window.evaluate_script(js).await?;

        let Some(serde_json::Value::Object(map)) = &value else {
            return Err(KeycloudStepError::External(KeycloudInputError::StepRequirementsNotMet {
                reason: "JavaScript failed to parse and run".to_string(),
            }));
        };

        let Some(serde_json::Value::Array(errors)) = map.get("keycloud_errs") else {
            return Err(KeycloudStepError::Internal(KeycloudInternalError::Custom {
                msg: format!("JavaScript returned an unexpected value: {value:?}"),
            }));
        };

        if !errors.is_empty() {
            return Err(KeycloudStepError::Assertion(
                KeycloudTestFailure::BrowserJavascriptErr {
                    msg: errors
                        .iter()
                        .filter_map(|v| v.as_str())
                        .collect::<Vec<_>>()
                        .join("\n"),
                    logs: map
                        .get("logs")
                        .and_then(|l| l.as_str())
                        .unwrap_or_default()
                        .to_string(),
                },
            ));
        }

        Ok(map
            .get("inner_response")
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    pub struct EvalJs;

    inventory::submit! {
        &EvalJs as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for EvalJs {
        fn segments(&self) -> &'static str {
            "In my browser, I evaluate {js}"
        }

        async fn run(
            &self,
            args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let js = args.get_string("js")?;

            _ = eval_and_return_js(js, world).await?;

            Ok(())
        }
    }

    pub struct GetJs;

    inventory::submit! {
        &GetJs as &dyn KeycloudRetriever
    }

    #[async_trait]
    impl KeycloudRetriever for GetJs {
        fn segments(&self) -> &'static str {
            "In my browser, the result of {js}"
        }

        async fn run(
            &self,
            args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<serde_json::Value, KeycloudStepError> {
            let js = args.get_string("js")?;

            eval_and_return_js(js, world).await
        }
    }

    pub struct GetConsole;

    inventory::submit! {
        &GetConsole as &dyn KeycloudRetriever
    }

    #[async_trait]
    impl KeycloudRetriever for GetConsole {
        fn segments(&self) -> &'static str {
            "In my browser, the console"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<serde_json::Value, KeycloudStepError> {
            eval_and_return_js("return window.keycloud_log_events.ALL;".to_string(), world).await
        }
    }
}

mod current_url {
    use super::*;

    pub struct CurrentUrl;

    inventory::submit! {
        &CurrentUrl as &dyn KeycloudRetriever
    }

    #[async_trait]
    impl KeycloudRetriever for CurrentUrl {
        fn segments(&self) -> &'static str {
            "In my browser, the current URL"
        }

        async fn run(
            &self,
            _args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<serde_json::Value, KeycloudStepError> {
            let window = require_window(world)?;

            Ok(serde_json::Value::String(window.current_url().await?))
        }
    }
}

pub mod screenshots {
    use super::*;

    pub struct ScreenshotViewport;

    inventory::submit! {
        &ScreenshotViewport as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for ScreenshotViewport {
        fn segments(&self) -> &'static str {
            "In my browser, I screenshot the viewport to {filepath}"
        }

        async fn run(
            &self,
            args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let filepath = args.get_string("filepath")?;
            let resolved_path = world.resolve_file_path(&filepath);
            if let Some(parent) = resolved_path.parent() {
                std::fs::create_dir_all(parent).map_err(KeycloudInternalError::from)?;
            }

            let window = require_window(world)?;

            window.screenshot_viewport(resolved_path).await
        }
    }
}

mod interactions {
    use super::*;

    pub struct ClickText;

    inventory::submit! {
        &ClickText as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for ClickText {
        fn segments(&self) -> &'static str {
            "In my browser, I click {text}"
        }

        async fn run(
            &self,
            args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let text = args.get_string("text")?;
            let deadline = poll_deadline_secs(world);

            let window = require_window(world)?;

            window.click_text(&text, deadline).await
        }
    }

    pub struct ClickSelector;

    inventory::submit! {
        &ClickSelector as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for ClickSelector {
        fn segments(&self) -> &'static str {
            "In my browser, I click the selector {selector}"
        }

        async fn run(
            &self,
            args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let selector = args.get_string("selector")?;
            let deadline = poll_deadline_secs(world);

            let window = require_window(world)?;

            window.click_selector(&selector, deadline).await
        }
    }

    pub struct TypeIntoField;

    inventory::submit! {
        &TypeIntoField as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for TypeIntoField {
        fn segments(&self) -> &'static str {
            "In my browser, I type {text} into the field {selector}"
        }

        async fn run(
            &self,
            args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let text = args.get_string("text")?;
            let selector = args.get_string("selector")?;
            let deadline = poll_deadline_secs(world);

            let window = require_window(world)?;

            window.type_into(&selector, &text, deadline).await
        }
    }

    pub struct PressKey;

    inventory::submit! {
        &PressKey as &dyn KeycloudInstruction
    }

    #[async_trait]
    impl KeycloudInstruction for PressKey {
        fn segments(&self) -> &'static str {
            "In my browser, I press the {keyname} key"
        }

        async fn run(
            &self,
            args: &SegmentArgs<'_>,
            world: &mut ScenarioWorld,
        ) -> Result<(), KeycloudStepError> {
            let keyname = args.get_string("keyname")?;
            let deadline = poll_deadline_secs(world);

            let window = require_window(world)?;

            window.press_key(&keyname, deadline).await
        }
    }
}
