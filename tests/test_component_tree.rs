//! Registry, locator resolution and persistence of component trees.

use lumen::comp::{AccumFilm, Component, Context, Group, Ptr, WeakRef};
use lumen::core::errors::{ErrorKind, Result};
use lumen::serial::{InputArchive, OutputArchive};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;

#[lumen::component("test::lens")]
#[derive(Debug, Default)]
struct Lens {
    radius: f64,
}

impl Component for Lens {
    fn construct(&mut self, prop: &Value) -> Result<()> {
        self.radius = prop["radius"].as_f64().unwrap_or(0.0);
        Ok(())
    }

    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.save(&self.radius)
    }

    fn load(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        self.radius = ar.load()?;
        Ok(())
    }
}

#[lumen::component("test::camera")]
#[derive(Debug, Default)]
struct Camera {
    fov: f64,
    film: WeakRef,
    lens: Option<Ptr>,
}

impl Component for Camera {
    fn construct(&mut self, prop: &Value) -> Result<()> {
        self.fov = prop["fov"].as_f64().unwrap_or(45.0);
        self.film = WeakRef::new(prop["film"].as_str().unwrap_or(""));
        Ok(())
    }

    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.save(&self.fov)?;
        ar.save(&self.film)?;
        ar.save_ptr(self.lens.as_ref())
    }

    fn load(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        self.fov = ar.load()?;
        self.film = ar.load()?;
        ar.load_into(&mut self.lens, "lens")
    }

    fn underlying(&self, name: &str) -> Option<&Ptr> {
        match name {
            "lens" => self.lens.as_ref(),
            _ => None,
        }
    }

    fn underlying_mut(&mut self, name: &str) -> Option<&mut Ptr> {
        match name {
            "lens" => self.lens.as_mut(),
            _ => None,
        }
    }

    fn for_each_underlying(&self, visit: &mut dyn FnMut(&str, &Ptr)) {
        if let Some(lens) = &self.lens {
            visit("lens", lens);
        }
    }

    fn for_each_underlying_mut(&mut self, visit: &mut dyn FnMut(&str, &mut Ptr)) {
        if let Some(lens) = &mut self.lens {
            visit("lens", lens);
        }
    }
}

fn group(children: Vec<(&str, Ptr)>) -> Ptr {
    let mut group = Group::new();
    for (name, child) in children {
        group.insert(name, child);
    }
    Ptr::from_box("group", Box::new(group))
}

/// `$.scene.cameras.main.lens` plus `$.film`
fn build_scene(ctx: &Context) -> Ptr {
    let mut camera = ctx
        .create_with("test::camera", "", &json!({ "fov": 30.0, "film": "$.film" }))
        .unwrap();
    camera.downcast_mut::<Camera>().unwrap().lens =
        Some(ctx.create_with("test::lens", "", &json!({ "radius": 0.25 })).unwrap());

    let mut film = ctx.create_with("film::accum", "", &json!({ "w": 3, "h": 2 })).unwrap();
    film.downcast_mut::<AccumFilm>().unwrap().buffer_mut().splat(4, [0.5, 1.5, 2.5]);

    group(vec![
        ("scene", group(vec![("cameras", group(vec![("main", camera)]))])),
        ("film", film),
    ])
}

#[test]
fn test_static_registration() {
    let ctx = Context::new();
    let keys = ctx.registry().keys();
    for key in ["film::accum", "group", "test::camera", "test::lens"] {
        assert!(keys.iter().any(|k| k == key), "missing {}", key);
    }
}

#[test]
fn test_locator_resolution() {
    let mut ctx = Context::new();
    let root = build_scene(&ctx);
    ctx.register_root(root);

    assert_eq!(ctx.resolve("$").unwrap().key(), "group");
    let lens = ctx.resolve("$.scene.cameras.main.lens").unwrap();
    assert_eq!(lens.loc(), "$.scene.cameras.main.lens");
    assert_eq!(lens.downcast_ref::<Lens>().unwrap().radius, 0.25);

    assert_eq!(ctx.resolve("$.missing").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(ctx.resolve("scene.cameras").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(ctx.resolve("").unwrap_err().kind(), ErrorKind::NotFound);

    let camera = ctx.resolve_as::<Camera>("$.scene.cameras.main").unwrap();
    let film = ctx.resolve_weak(&camera.film).unwrap();
    assert_eq!(film.key(), "film::accum");

    ctx.resolve_as_mut::<Camera>("$.scene.cameras.main").unwrap().fov = 60.0;
    assert_eq!(ctx.resolve_as::<Camera>("$.scene.cameras.main").unwrap().fov, 60.0);
}

#[test]
fn test_round_trip_single_component() {
    let mut ctx = Context::new();
    let film = ctx.create_with("film::accum", "", &json!({ "w": 2, "h": 2 })).unwrap();
    ctx.register_root(film);
    ctx.resolve_as_mut::<AccumFilm>("$").unwrap().buffer_mut().splat(3, [1.0, 2.0, 3.0]);

    let bytes = ctx.serialize_to_vec().unwrap();
    let mut restored = Context::new();
    restored.deserialize_from_slice(&bytes).unwrap();

    let film = restored.resolve_as::<AccumFilm>("$").unwrap();
    assert_eq!(film.buffer(), ctx.resolve_as::<AccumFilm>("$").unwrap().buffer());
    assert_eq!(restored.root().unwrap().loc(), "$");
}

#[test]
fn test_round_trip_nested_tree() {
    let mut ctx = Context::new();
    let root = build_scene(&ctx);
    ctx.register_root(root);

    let mut bytes = Vec::new();
    ctx.serialize(&mut bytes).unwrap();
    let mut restored = Context::new();
    restored.deserialize(&mut bytes.as_slice()).unwrap();

    let camera = restored.resolve_as::<Camera>("$.scene.cameras.main").unwrap();
    assert_eq!(camera.fov, 30.0);
    assert_eq!(camera.film.loc(), "$.film");
    assert_eq!(
        restored.resolve("$.scene.cameras.main.lens").unwrap().loc(),
        "$.scene.cameras.main.lens"
    );
    assert_eq!(
        restored.resolve_as::<Lens>("$.scene.cameras.main.lens").unwrap().radius,
        0.25
    );
    assert_eq!(
        restored.resolve_as::<AccumFilm>("$.film").unwrap().buffer().pixel(4),
        Some([0.5, 1.5, 2.5])
    );

    // Saving the restored tree gives the same stream
    assert_eq!(restored.serialize_to_vec().unwrap(), bytes);
}

#[test]
fn test_unknown_key_fails_round_trip() {
    let mut ctx = Context::new();
    let root = build_scene(&ctx);
    ctx.register_root(root);
    let bytes = ctx.serialize_to_vec().unwrap();

    let registry = lumen::comp::Registry::with_builtins();
    registry.unregister("test::lens");
    let mut restored = Context::with_registry(registry);
    let err = restored.deserialize_from_slice(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RoundTripMismatch);
    assert!(restored.root().is_none());
}

#[test]
fn test_checkpoint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scene.lmn");

    let mut ctx = Context::new();
    let root = build_scene(&ctx);
    ctx.register_root(root);
    ctx.save_checkpoint(&path).unwrap();

    let mut restored = Context::new();
    restored.load_checkpoint(&path).unwrap();
    assert!(restored.resolve("$.scene.cameras.main.lens").is_ok());

    let err = restored.load_checkpoint(dir.path().join("missing.lmn")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_missing_plugin_directory() {
    let dir = TempDir::new().unwrap();
    let mut ctx = Context::new();
    let before = ctx.registry().len();
    assert_eq!(ctx.load_module_directory(dir.path().join("plugins")).unwrap(), 0);
    assert_eq!(ctx.load_module_directory(dir.path()).unwrap(), 0);
    assert_eq!(ctx.registry().len(), before);
}
