//! Generic `SensorDriver` trait for anything the bridge polls.
//!
//! Drivers are handed to a sensor worker, which owns them exclusively for the
//! lifetime of the bridge.  The rest of the system only ever talks to the
//! trait, so a simulated tag and a real one on `/dev/ttyACM0` are
//! interchangeable.

use async_trait::async_trait;
use bridge_types::{FieldSample, OrientationSample, PositionSample, ReadError};

/// A pollable sensor producing samples of one shape.
///
/// # Contract
///
/// * `open` – acquire and configure the device.  Any error is treated as
///   fatal by the caller; there is no retry.
/// * `try_read` – fetch the freshest sample.  `Ok(None)` means the device had
///   nothing new this cycle.  [`ReadError::Transient`] leaves the previous
///   value in place; the caller keeps polling.
/// * `close` – release the device.  Called once after the polling loop
///   exits.
///
/// `try_read` may block on I/O; callers bound it with a timeout, so
/// implementations must be cancel-safe at their `.await` points.
#[async_trait]
pub trait SensorDriver: Send {
    /// The sample type, which also fixes the blackboard field it feeds.
    type Sample: FieldSample + Send + 'static;

    /// Stable identifier for this device, e.g. `"bno085"` or `"dwm1001"`.
    fn id(&self) -> &str;

    async fn open(&mut self) -> Result<(), ReadError>;

    async fn try_read(&mut self) -> Result<Option<Self::Sample>, ReadError>;

    async fn close(&mut self) {}
}

/// Boxed orientation driver, as stored in a sensor set.
pub type OrientationDriver = Box<dyn SensorDriver<Sample = OrientationSample>>;

/// Boxed position driver, as stored in a sensor set.
pub type PositionDriver = Box<dyn SensorDriver<Sample = PositionSample>>;

#[async_trait]
impl<D> SensorDriver for Box<D>
where
    D: SensorDriver + ?Sized,
{
    type Sample = D::Sample;

    fn id(&self) -> &str {
        (**self).id()
    }

    async fn open(&mut self) -> Result<(), ReadError> {
        (**self).open().await
    }

    async fn try_read(&mut self) -> Result<Option<Self::Sample>, ReadError> {
        (**self).try_read().await
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal in-process driver used only for tests.
    struct CountingDriver {
        reads: u32,
    }

    #[async_trait]
    impl SensorDriver for CountingDriver {
        type Sample = OrientationSample;

        fn id(&self) -> &str {
            "counting"
        }

        async fn open(&mut self) -> Result<(), ReadError> {
            Ok(())
        }

        async fn try_read(&mut self) -> Result<Option<OrientationSample>, ReadError> {
            self.reads += 1;
            if self.reads % 2 == 0 {
                Err(ReadError::Transient("odd cycle".to_string()))
            } else {
                Ok(Some(OrientationSample::IDENTITY))
            }
        }
    }

    #[tokio::test]
    async fn boxed_driver_forwards_calls() {
        let mut driver: OrientationDriver = Box::new(CountingDriver { reads: 0 });
        assert_eq!(driver.id(), "counting");
        driver.open().await.unwrap();
        assert_eq!(
            driver.try_read().await.unwrap(),
            Some(OrientationSample::IDENTITY)
        );
        assert!(matches!(
            driver.try_read().await,
            Err(ReadError::Transient(_))
        ));
        driver.close().await;
    }
}
