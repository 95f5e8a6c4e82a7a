pub mod portal_renderer;
