use ::sesame::compositor::ComposedImage;
use ::sesame::config::{DaemonConfig, DEFAULT_SKYBOX_COLOR, DEFAULT_SKYBOX_SIZE};
use ::sesame::error::{DaemonError, Result};
use ::sesame::Rgba;

use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub struct EnvironmentConfig {
    pub size: u32,
    pub fill_color: Rgba<u8>,
    pub active_image_id: Option<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> EnvironmentConfig {
        return EnvironmentConfig {
            size: DEFAULT_SKYBOX_SIZE,
            fill_color: DEFAULT_SKYBOX_COLOR,
            active_image_id: None,
        };
    }
}

impl EnvironmentConfig {
    pub fn from_daemon_config(config: &DaemonConfig) -> EnvironmentConfig {
        return EnvironmentConfig {
            size: config.skybox_size,
            fill_color: config.skybox_color,
            active_image_id: None,
        };
    }
}

/// Composed skyboxes plus the current environment settings.
///
/// Not synchronized: it lives inside the main loop's stage and is only ever reached
/// through a `&mut` handed to deferred tasks.
#[derive(Debug, Default)]
pub struct StateStore {
    // key: image id sent by the client
    images: HashMap<String, ComposedImage>,
    config: EnvironmentConfig,
}

impl StateStore {
    pub fn new(config: EnvironmentConfig) -> StateStore {
        return StateStore {
            images: HashMap::new(),
            config,
        };
    }

    /// Inserts or wholesale-replaces the image under `id`, returning the old one.
    pub fn put(&mut self, id: String, image: ComposedImage) -> Option<ComposedImage> {
        self.images.insert(id, image)
    }

    pub fn get(&self, id: &str) -> Result<&ComposedImage> {
        self.images
            .get(id)
            .ok_or_else(|| DaemonError::ImageNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EnvironmentConfig {
        &mut self.config
    }

    pub fn active_image(&self) -> Option<(&str, &ComposedImage)> {
        let id = self.config.active_image_id.as_deref()?;
        self.images.get(id).map(|img| (id, img))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::sesame::RgbaImage;

    fn solid(size: u32, color: [u8; 4]) -> ComposedImage {
        ComposedImage::from(RgbaImage::from_pixel(size, size, Rgba(color)))
    }

    #[test]
    fn put_get_and_replace() {
        let mut store = StateStore::default();
        assert!(matches!(store.get("a"), Err(DaemonError::ImageNotFound(id)) if id == "a"));

        assert!(store.put("a".to_string(), solid(2, [1, 1, 1, 255])).is_none());
        let old = store.put("a".to_string(), solid(2, [2, 2, 2, 255])).unwrap();
        assert_eq!(old.pixel(0, 0), Rgba([1, 1, 1, 255]));
        assert_eq!(store.get("a").unwrap().pixel(0, 0), Rgba([2, 2, 2, 255]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn defaults_and_active_image() {
        let mut store = StateStore::default();
        assert_eq!(store.config().size, 6000);
        assert_eq!(store.config().fill_color, Rgba([128, 128, 128, 255]));
        assert!(store.active_image().is_none());

        store.put("sky".to_string(), solid(1, [0, 0, 255, 255]));
        store.config_mut().active_image_id = Some("sky".to_string());
        let (id, img) = store.active_image().unwrap();
        assert_eq!(id, "sky");
        assert_eq!(img.pixel(0, 0), Rgba([0, 0, 255, 255]));

        store.config_mut().active_image_id = Some("gone".to_string());
        assert!(store.active_image().is_none());
    }

    #[test]
    fn seeded_from_daemon_config() {
        let mut daemon = DaemonConfig::default();
        daemon.skybox_size = 100;
        daemon.skybox_color = Rgba([1, 2, 3, 4]);
        let config = EnvironmentConfig::from_daemon_config(&daemon);
        assert_eq!(config.size, 100);
        assert_eq!(config.fill_color, Rgba([1, 2, 3, 4]));
        assert_eq!(config.active_image_id, None);
    }
}
