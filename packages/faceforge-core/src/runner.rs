//! The enhancement run: walk the shared-folder gallery, identify each face,
//! drive the editor through the planned enhancements and collect the results.

use std::{
    collections::VecDeque,
    fs,
    io::Cursor,
    path::{Path, PathBuf},
    thread::sleep,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use image::{DynamicImage, ImageFormat, Rgba};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use log::{error, info, warn};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use faceforge_cv::images_similar;

use crate::{
    catalog::Catalog,
    coords::ScreenCoords,
    detector::{FaceDetector, FaceRect, FACE_MIN_WIDTH},
    facedata::{FaceDataSet, FaceDetail},
    limiter::RateLimiter,
    resource::{category_template, slug, type_template},
    search::{best_match, collection_id_for_source, FaceSearch},
    selector::{plan_enhancements, Decision},
    EnhanceError, Session,
};

const DRAG_DURATION: Duration = Duration::from_millis(300);
const SAVE_ATTEMPTS: u32 = 5;
/// Horizontal distance one carousel drag covers, in device pixels.
const CAROUSEL_DRAG: i32 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedEnhancement {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// One line of the run's `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementOutcome {
    pub id: String,
    pub enhancements: Vec<AppliedEnhancement>,
    pub enhanced_image_path: String,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Stop after this many gallery sets; 0 means run until exhausted.
    pub max_iterations: u32,
    /// Stop after this many recorded outcomes; 0 means no cap.
    pub limit: u32,
    pub editor_poll_interval: Duration,
    pub editor_poll_attempts: u32,
}

impl RunConfig {
    pub fn new(source_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            output_dir: output_dir.into(),
            max_iterations: 0,
            limit: 0,
            editor_poll_interval: Duration::from_secs(2),
            editor_poll_attempts: 10,
        }
    }
}

/// What happened to one dequeued face.
enum FaceStep {
    Done,
    Skipped,
    /// Saving failed; the face rect goes back in the queue.
    RetrySave(FaceRect),
}

enum FaceGate {
    Unknown,
    Underage,
    Eligible(FaceDetail),
}

enum SaveResult {
    Saved(String),
    RetryNeeded,
    Abandoned,
}

pub struct EnhanceRunner<S: FaceSearch> {
    session: Session,
    detector: FaceDetector,
    search: S,
    facedata: FaceDataSet,
    catalog: Catalog,
    limiter: RateLimiter,
    config: RunConfig,
    rng: StdRng,
    outcomes: Vec<EnhancementOutcome>,
    /// Post-save face rects from earlier faces; the average stands in when a
    /// save screen yields no clean detection.
    enhanced_face_history: Vec<FaceRect>,
}

impl<S: FaceSearch> EnhanceRunner<S> {
    pub fn new(
        session: Session,
        detector: FaceDetector,
        search: S,
        facedata: FaceDataSet,
        catalog: Catalog,
        config: RunConfig,
    ) -> Self {
        Self {
            session,
            detector,
            search,
            facedata,
            catalog,
            limiter: RateLimiter::per_face(),
            config,
            rng: StdRng::from_os_rng(),
            outcomes: Vec::new(),
            enhanced_face_history: Vec::new(),
        }
    }

    pub fn run(&mut self) -> Result<(), EnhanceError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let run_dir = self.config.output_dir.join(timestamp.to_string());
        fs::create_dir_all(&run_dir)?;
        let index_path = run_dir.join("index.json");
        let collection_id = collection_id_for_source(&self.config.source_dir);
        info!(
            "run directory {}, collection {collection_id}",
            run_dir.display()
        );

        let mut queue: VecDeque<FaceRect> = VecDeque::new();
        let mut gallery_screen: Option<DynamicImage> = None;
        let mut scroll_y: Vec<u32> = Vec::new();
        let mut sets_processed: u32 = 0;
        let mut face_index: u32 = 0;

        loop {
            if self.config.max_iterations > 0 && sets_processed >= self.config.max_iterations {
                info!("reached max iterations ({})", self.config.max_iterations);
                break;
            }
            if self.config.limit > 0 && self.outcomes.len() as u32 >= self.config.limit {
                info!("reached outcome limit ({})", self.config.limit);
                break;
            }
            face_index += 1;

            // Each face starts from the gallery so the scroll state is known.
            self.session.move_to_shared_folder_from_home()?;
            if self.replay_scrolls(&scroll_y, sets_processed)? {
                info!("gallery exhausted after {sets_processed} sets");
                break;
            }

            if queue.is_empty() {
                let screen = self.session.controller.screencap()?;
                let faces = self.detector.detect(&screen, FACE_MIN_WIDTH);
                info!("found {} faces in gallery set {sets_processed}", faces.len());
                if faces.is_empty() {
                    warn!("no faces detected in gallery screen, stopping");
                    break;
                }
                if let Some(anchor_y) = Self::scroll_anchor(&faces, &screen, &self.session) {
                    scroll_y.push(anchor_y);
                }
                self.dump_detections(&screen, &faces, sets_processed);
                queue.extend(faces);
                gallery_screen = Some(screen);
            }

            let Some(screen) = gallery_screen.clone() else {
                break;
            };
            let Some(rect) = queue.pop_front() else {
                break;
            };
            if queue.is_empty() {
                // The next detection pass needs one more replayed scroll.
                sets_processed += 1;
            }

            match self.process_face(face_index, rect, &screen, &collection_id, &run_dir, &index_path)? {
                FaceStep::Done | FaceStep::Skipped => {}
                FaceStep::RetrySave(rect) => queue.push_back(rect),
            }
        }

        write_index(&index_path, &self.outcomes)?;
        info!(
            "enhancement run complete: {} outcomes in {}",
            self.outcomes.len(),
            run_dir.display()
        );
        Ok(())
    }

    /// Re-apply the scrolls that led past the already processed sets. `true`
    /// means a scroll no longer changes the screen: the gallery is exhausted.
    fn replay_scrolls(&mut self, scroll_y: &[u32], sets: u32) -> Result<bool, EnhanceError> {
        let center = self.session.screen_center();
        for &y in scroll_y.iter().take(sets as usize) {
            let pre = self.session.controller.screencap()?;
            self.session.controller.move_to(center.x, y)?;
            sleep(Duration::from_millis(250));
            self.session
                .controller
                .drag((center.x, y), (center.x as i32, 0), DRAG_DURATION)?;
            sleep(Duration::from_millis(250));
            let post = self.session.controller.screencap()?;
            if images_similar(&pre, &post) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Scroll anchor for this set: just above the bottom edge of the face
    /// whose bottom sits highest, in device pixels.
    fn scroll_anchor(faces: &[FaceRect], screen: &DynamicImage, session: &Session) -> Option<u32> {
        let anchor = faces.iter().min_by_key(|r| r.y + r.height)?;
        let bottom = (anchor.y + anchor.height).saturating_sub(anchor.height / 8);
        let landmark = bottom as f64 / screen.height() as f64;
        let (_, device_h) = session.controller.screen_size();
        Some((landmark * device_h as f64).round() as u32)
    }

    fn dump_detections(&self, screen: &DynamicImage, faces: &[FaceRect], set: u32) {
        if self.session.debug_dir.is_none() {
            return;
        }
        let mut annotated = screen.to_rgba8();
        for r in faces {
            draw_hollow_rect_mut(
                &mut annotated,
                Rect::at(r.x as i32, r.y as i32).of_size(r.width, r.height),
                Rgba([0, 0, 255, 255]),
            );
        }
        self.session.debug_dump(
            &format!("face-detect-screen-{set}"),
            &DynamicImage::ImageRgba8(annotated),
        );
    }

    fn process_face(
        &mut self,
        face_index: u32,
        rect: FaceRect,
        screen: &DynamicImage,
        collection_id: &str,
        run_dir: &Path,
        index_path: &Path,
    ) -> Result<FaceStep, EnhanceError> {
        let (cx, cy) = rect.center();
        let (dx, dy) = self
            .session
            .locator
            .to_device_coords(cx, cy, screen.width(), screen.height());
        let face_coords = ScreenCoords { x: dx, y: dy };

        let crop = screen.crop_imm(rect.x, rect.y, rect.width, rect.height);
        let crop_jpeg = encode_jpeg(&crop)?;

        self.limiter.take();
        let matches = match self.search.search_by_image(collection_id, &crop_jpeg) {
            Ok(matches) => matches,
            Err(err) => {
                error!(
                    "face {face_index}: search failed at ({}, {}): {err}",
                    face_coords.x, face_coords.y
                );
                self.session
                    .debug_dump(&format!("search-failure-{face_index}"), screen);
                self.session.os_back_click()?;
                return Ok(FaceStep::Skipped);
            }
        };
        let Some(matched) = best_match(&matches) else {
            warn!("face {face_index}: no match above the similarity bar");
            self.session.os_back_click()?;
            return Ok(FaceStep::Skipped);
        };
        let external_id = matched.external_id.clone();
        info!(
            "face {face_index}: identified as {external_id} (similarity {:.3})",
            matched.similarity
        );

        if already_enhanced(&self.outcomes, &external_id) {
            info!("face {face_index}: {external_id} already enhanced");
            self.session.os_back_click()?;
            return Ok(FaceStep::Skipped);
        }

        let detail = match gate_face(&self.facedata, &external_id) {
            FaceGate::Unknown => {
                warn!("face {face_index}: no face data for {external_id}");
                self.session.os_back_click()?;
                return Ok(FaceStep::Skipped);
            }
            FaceGate::Underage => {
                info!("face {face_index}: character {external_id} is underage, skipping");
                self.session.os_back_click()?;
                return Ok(FaceStep::Skipped);
            }
            FaceGate::Eligible(detail) => detail,
        };

        // Open the editor and wait for the category carousel to render.
        self.session.move_click(face_coords)?;
        info!("face {face_index}: {external_id} selected");
        let first_category = category_template(&self.catalog.enhancements[0].name);
        let loaded = self.session.wait_for_element(
            &first_category,
            self.config.editor_poll_interval,
            self.config.editor_poll_attempts,
        )?;
        if !loaded {
            warn!("face {face_index}: editor never loaded for {external_id}");
            self.session.os_back_click()?;
            return Ok(FaceStep::Skipped);
        }

        if let Err(err) = self.fix_gender_interface() {
            error!("face {face_index}: cannot reach the gender switch: {err}");
            self.session.os_back_click()?;
            self.session.os_back_click()?;
            return Ok(FaceStep::Skipped);
        }

        let plan = plan_enhancements(&self.catalog, &detail, &mut self.rng);
        info!(
            "face {face_index}: {} enhancements planned for {external_id}",
            plan.len()
        );

        let mut applied: Vec<AppliedEnhancement> = Vec::new();
        for decision in &plan {
            if self.apply_enhancement(&external_id, decision, !applied.is_empty())? {
                applied.push(AppliedEnhancement {
                    name: decision.category.clone(),
                    type_name: decision.type_name.clone(),
                });
            }
        }

        let mut enhanced_image_path = String::new();
        if !applied.is_empty() {
            match self.save_enhanced(&external_id, run_dir)? {
                SaveResult::Saved(path) => enhanced_image_path = path,
                SaveResult::RetryNeeded => {
                    warn!(
                        "face {face_index}: {external_id} failed to save, requeueing"
                    );
                    self.session.exit_screen(true)?;
                    sleep(Duration::from_millis(1000));
                    return Ok(FaceStep::RetrySave(rect));
                }
                SaveResult::Abandoned => return Ok(FaceStep::Skipped),
            }
        }

        info!(
            "face {face_index}: {} enhancements made for {external_id}",
            applied.len()
        );
        self.outcomes.push(EnhancementOutcome {
            id: external_id,
            enhancements: applied,
            enhanced_image_path,
        });
        write_index(index_path, &self.outcomes)?;

        // Editor back to home for the next gallery pass.
        self.session.os_back_click()?;
        Ok(FaceStep::Done)
    }

    /// Make sure the gender-specific controls are the female set. The switch
    /// has no distinct template, so its position is derived geometrically
    /// from the editor header.
    fn fix_gender_interface(&mut self) -> Result<(), EnhanceError> {
        let switch = match self.session.coords_cache.get("editor-gender-switch-icon") {
            Some(coords) => coords,
            None => {
                let editor_screen = self.session.controller.screencap()?;
                let header = self.session.locate_in("editor-header.png", &editor_screen)?;
                let header_img = self.session.assets.get("editor-header.png")?;
                let switch_img = self.session.assets.get("gender-switch-icon.png")?;

                // The switch sits at the header's right edge: offset the
                // header center by half of each width, in screenshot space.
                let (screen_w, _) = self.session.controller.screen_size();
                let x_landmark = header.x as f64 / screen_w as f64;
                let x_in_img = x_landmark * editor_screen.width() as f64;
                let switch_x_in_img =
                    x_in_img + header_img.width() as f64 / 2.0 - switch_img.width() as f64 / 2.0;
                let switch_x = (switch_x_in_img / editor_screen.width() as f64
                    * screen_w as f64)
                    .round() as u32;

                let coords = ScreenCoords {
                    x: switch_x,
                    y: header.y,
                };
                self.session
                    .coords_cache
                    .put("editor-gender-switch-icon", coords);
                coords
            }
        };
        self.session.move_click(switch)?;
        sleep(Duration::from_millis(250));

        let option = self.session.cached_locate(
            "editor-gender-switch-option",
            "gender-switch-female-option.png",
        )?;
        self.session.move_click(option)?;
        sleep(Duration::from_millis(250));
        Ok(())
    }

    /// Apply one planned enhancement. `Ok(false)` means this decision was
    /// skipped recoverably; the editor is back where it started.
    fn apply_enhancement(
        &mut self,
        external_id: &str,
        decision: &Decision,
        any_applied: bool,
    ) -> Result<bool, EnhanceError> {
        info!("{external_id}: entering {}", decision.category);
        let category_coords = match self.session.cached_locate(
            &format!("enhancement-{}", decision.category),
            &category_template(&decision.category),
        ) {
            Ok(coords) => coords,
            Err(EnhanceError::Locate(err)) => {
                error!("{external_id}: cannot select {}: {err}", decision.category);
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        self.session.move_click(category_coords)?;
        sleep(Duration::from_millis(1000));

        if decision.scroll_requirement > 0 {
            if !self.scroll_carousel(external_id, decision)? {
                return Ok(false);
            }
        }

        let editor_screen = self.session.controller.screencap()?;
        self.session.debug_dump(
            &format!("editor-screen-{}", slug(&decision.type_name)),
            &editor_screen,
        );

        let type_coords = match self.session.cached_locate_in(
            &format!("enhancement-type-{}", decision.type_name),
            &type_template(&decision.category, &decision.type_name),
            &editor_screen,
        ) {
            Ok(coords) => coords,
            Err(EnhanceError::Locate(err)) => {
                error!(
                    "{external_id}: cannot find type {}: {err}",
                    decision.type_name
                );
                self.session.os_back_click()?;
                self.session.exit_screen(any_applied)?;
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        self.session.move_click(type_coords)?;

        // Apply, with a second click in case the first lands mid-animation.
        let apply = self.session.cached_locate("editor-apply", "apply.png")?;
        self.session.move_click(apply)?;
        self.session.controller.click()?;
        sleep(Duration::from_millis(2000));
        info!(
            "{external_id}: applied {} / {}",
            decision.category, decision.type_name
        );
        Ok(true)
    }

    /// Drag the type carousel left until the target type is in view, using
    /// an always-visible type of the same category as the anchor row.
    fn scroll_carousel(
        &mut self,
        external_id: &str,
        decision: &Decision,
    ) -> Result<bool, EnhanceError> {
        let reference = self
            .catalog
            .enhancements
            .iter()
            .find(|e| e.name == decision.category)
            .and_then(|e| e.scroll_reference())
            .cloned();
        let Some(reference) = reference else {
            warn!(
                "{external_id}: no scroll reference in {}, skipping {}",
                decision.category, decision.type_name
            );
            return Ok(false);
        };

        let anchor = match self.session.cached_locate(
            &format!("enhancement-type-{}", reference.name),
            &type_template(&decision.category, &reference.name),
        ) {
            Ok(coords) => coords,
            Err(EnhanceError::Locate(err)) => {
                error!(
                    "{external_id}: cannot find scroll reference {}: {err}",
                    reference.name
                );
                self.session.os_back_click()?;
                sleep(Duration::from_millis(1000));
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let steps = (decision.scroll_requirement as f64 / CAROUSEL_DRAG as f64).round() as u32;
        let center = self.session.screen_center();
        for _ in 0..steps {
            self.session.controller.move_to(center.x, anchor.y)?;
            sleep(Duration::from_millis(500));
            self.session.controller.drag(
                (center.x, anchor.y),
                (center.x as i32 - CAROUSEL_DRAG, anchor.y as i32),
                DRAG_DURATION,
            )?;
        }
        sleep(Duration::from_millis(1000));
        info!(
            "{external_id}: scrolled {steps} steps towards {}",
            decision.type_name
        );
        Ok(true)
    }

    /// Save the edited face and crop the result out of the post-save screen.
    fn save_enhanced(
        &mut self,
        external_id: &str,
        run_dir: &Path,
    ) -> Result<SaveResult, EnhanceError> {
        let editor_screen = self.session.controller.screencap()?;
        let save = self
            .session
            .cached_locate_in("editor-save", "save.png", &editor_screen)?;

        let mut post_save = None;
        for _ in 0..SAVE_ATTEMPTS {
            self.session.move_click(save)?;
            self.session.controller.click()?;
            sleep(Duration::from_millis(2000));
            let post = self.session.controller.screencap()?;
            if !images_similar(&editor_screen, &post) {
                post_save = Some(post);
                break;
            }
        }
        let Some(post_save) = post_save else {
            return Ok(SaveResult::RetryNeeded);
        };
        info!("{external_id}: saved");

        let faces = self.detector.detect(&post_save, FACE_MIN_WIDTH);
        let rect = if faces.len() == 1 {
            self.enhanced_face_history.push(faces[0]);
            faces[0]
        } else {
            if faces.len() > 1 {
                // The before/after preview carries a second face.
                warn!("{external_id}: multiple faces on the save screen");
            } else {
                warn!("{external_id}: no face found on the save screen");
            }
            match FaceRect::average(&self.enhanced_face_history) {
                Some(avg) => {
                    info!("{external_id}: using averaged face position");
                    avg
                }
                None => {
                    error!("{external_id}: no earlier positions to fall back on");
                    self.session.os_back_click()?;
                    self.session.os_back_click()?;
                    return Ok(SaveResult::Abandoned);
                }
            }
        };

        let crop = post_save.crop_imm(rect.x, rect.y, rect.width, rect.height);
        let path = run_dir.join(format!("{external_id}.jpeg"));
        crop.to_rgb8().save(&path)?;
        info!(
            "{external_id}: enhanced face written to {}",
            path.display()
        );

        // Save screen back to the editor.
        self.session.os_back_click()?;
        Ok(SaveResult::Saved(path.to_string_lossy().into_owned()))
    }
}

fn already_enhanced(outcomes: &[EnhancementOutcome], external_id: &str) -> bool {
    outcomes.iter().any(|o| o.id == external_id)
}

fn gate_face(facedata: &FaceDataSet, external_id: &str) -> FaceGate {
    match facedata.get(external_id) {
        None => FaceGate::Unknown,
        Some(detail) if detail.is_underage() => FaceGate::Underage,
        Some(detail) => FaceGate::Eligible(detail.clone()),
    }
}

fn write_index(path: &Path, outcomes: &[EnhancementOutcome]) -> Result<(), EnhanceError> {
    let json = serde_json::to_vec_pretty(outcomes)?;
    fs::write(path, json)?;
    Ok(())
}

fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, EnhanceError> {
    let mut buf = Cursor::new(Vec::new());
    img.to_rgb8().write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}
